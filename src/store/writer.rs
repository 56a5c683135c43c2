use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::core::error::{Error, ErrorKind, Result};
use crate::dict::dictionary::Dictionary;
use crate::index::people_index::PeopleIndex;
use crate::posting::posting::Posting;
use crate::store::codec;
use crate::store::layout::{SectionKind, DIR_ENTRY_LEN, HEADER_LEN, MAGIC, VERSION};
use crate::store::varint;
use crate::store::IndexStore;

impl IndexStore {
    /// Writes the dictionary, metadata, and both posting maps into one
    /// `.rwdx` file. Section payloads are built in memory first, then the
    /// header, directory, and payloads stream out in order.
    pub fn save<P: AsRef<Path>>(path: P, dict: &Dictionary, index: &PeopleIndex) -> Result<()> {
        if !index.is_sealed() {
            return Err(Error::new(
                ErrorKind::Sealed,
                "save requires a sealed index".to_string(),
            ));
        }

        let sections = [
            (SectionKind::Dict, dict_payload(dict)?),
            (SectionKind::Meta, meta_payload(index)),
            (SectionKind::PostingsValue, value_payload(index)),
            (SectionKind::PostingsYear, year_payload(index)),
        ];

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(&MAGIC.to_le_bytes());
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // flags
        header.extend_from_slice(&(sections.len() as u32).to_le_bytes());

        let mut directory = Vec::with_capacity((sections.len() as u64 * DIR_ENTRY_LEN) as usize);
        let mut offset = HEADER_LEN + sections.len() as u64 * DIR_ENTRY_LEN;
        for (kind, payload) in &sections {
            directory.extend_from_slice(&(*kind as u32).to_le_bytes());
            directory.extend_from_slice(&offset.to_le_bytes());
            directory.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            offset += payload.len() as u64;
        }

        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&header)?;
        out.write_all(&directory)?;
        for (_, payload) in &sections {
            out.write_all(payload)?;
        }
        out.flush()?;

        info!(
            path = %path.as_ref().display(),
            bytes = offset,
            value_postings = index.value_posting_count(),
            year_postings = index.year_posting_count(),
            "wrote index file"
        );
        Ok(())
    }
}

fn dict_payload(dict: &Dictionary) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(dict.attr_count() as u32).to_le_bytes());
    for attr in 0..dict.attr_count() as i32 {
        varint::write_str(&mut buf, dict.attr_name(attr)?);
        let values = dict.values_for(attr)?;
        buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
        for value in values {
            varint::write_str(&mut buf, value);
        }
    }
    buf.extend_from_slice(&(dict.person_count() as u32).to_le_bytes());
    for person in 0..dict.person_count() as u32 {
        varint::write_str(&mut buf, dict.person_guid(person)?);
    }
    Ok(buf)
}

fn meta_payload(index: &PeopleIndex) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&index.universe().to_le_bytes());
    buf.extend_from_slice(&(index.value_posting_count() as u32).to_le_bytes());
    buf.extend_from_slice(&(index.year_posting_count() as u32).to_le_bytes());
    buf
}

fn value_payload(index: &PeopleIndex) -> Vec<u8> {
    // Entry order is not part of the format; sorting keeps files reproducible.
    let mut entries: Vec<(_, &Posting)> = index.value_postings().collect();
    entries.sort_by_key(|(key, _)| **key);

    let mut buf = Vec::new();
    for (key, posting) in entries {
        varint::write_u64(&mut buf, key.attr as u64);
        varint::write_u64(&mut buf, key.val as u64);
        codec::encode_posting(&mut buf, posting);
    }
    buf
}

fn year_payload(index: &PeopleIndex) -> Vec<u8> {
    let mut entries: Vec<(_, &Posting)> = index.year_postings().collect();
    entries.sort_by_key(|(key, _)| **key);

    let mut buf = Vec::new();
    for (key, posting) in entries {
        varint::write_u64(&mut buf, key.attr as u64);
        varint::write_u64(&mut buf, key.val as u64);
        varint::write_u64(&mut buf, key.month as u64);
        codec::encode_posting(&mut buf, posting);
    }
    buf
}
