//! `.rwdx` container layout: header, section directory, payload order.
//! All fixed-width integers are little-endian.

use crate::core::error::{Error, ErrorKind, Result};

/// "RWDX".
pub const MAGIC: u32 = 0x5257_4458;
pub const VERSION: u32 = 1;

/// magic + version + flags + sectionCount, u32 each.
pub const HEADER_LEN: u64 = 16;
/// kind u32 + offset u64 + length u64.
pub const DIR_ENTRY_LEN: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Dict = 1,
    Meta = 2,
    PostingsValue = 3,
    PostingsYear = 4,
}

impl SectionKind {
    pub fn from_u32(raw: u32) -> Option<SectionKind> {
        match raw {
            1 => Some(SectionKind::Dict),
            2 => Some(SectionKind::Meta),
            3 => Some(SectionKind::PostingsValue),
            4 => Some(SectionKind::PostingsYear),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SectionEntry {
    pub kind: SectionKind,
    pub offset: u64,
    pub length: u64,
}

pub(crate) fn read_u32_le(data: &[u8], pos: &mut usize) -> Result<u32> {
    let end = *pos + 4;
    if end > data.len() {
        return Err(Error::new(
            ErrorKind::Corrupt,
            "file truncated reading u32".to_string(),
        ));
    }
    let b = &data[*pos..end];
    let value = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    *pos = end;
    Ok(value)
}

pub(crate) fn read_u64_le(data: &[u8], pos: &mut usize) -> Result<u64> {
    let end = *pos + 8;
    if end > data.len() {
        return Err(Error::new(
            ErrorKind::Corrupt,
            "file truncated reading u64".to_string(),
        ));
    }
    let b = &data[*pos..end];
    let value = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
    *pos = end;
    Ok(value)
}
