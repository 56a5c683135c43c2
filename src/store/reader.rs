use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use tracing::info;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{packable_month, AttrVal, AttrValYear};
use crate::dict::dictionary::{Dictionary, DictionarySnapshot};
use crate::index::people_index::PeopleIndex;
use crate::posting::posting::Posting;
use crate::store::codec;
use crate::store::layout::{
    read_u32_le, read_u64_le, SectionEntry, SectionKind, DIR_ENTRY_LEN, HEADER_LEN, MAGIC, VERSION,
};
use crate::store::varint;
use crate::store::IndexStore;

/// Read-only memory-mapped index file. Postings are materialized into owned
/// memory during decoding, so the mapping does not outlive the load.
pub struct MmapFile {
    mmap: Mmap,
    pub len: usize,
}

impl MmapFile {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(MmapFile { mmap, len })
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap[..]
    }
}

struct Meta {
    universe: u64,
    value_posting_count: u32,
    year_posting_count: u32,
}

impl IndexStore {
    /// Memory-maps an `.rwdx` file, validates the header and directory, and
    /// decodes every section. The returned index is sealed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<(Dictionary, PeopleIndex)> {
        let file = MmapFile::open_read_only(&path)?;
        let data = file.data();

        let mut pos = 0;
        let magic = read_u32_le(data, &mut pos)?;
        if magic != MAGIC {
            return Err(Error::new(
                ErrorKind::BadMagic,
                format!("expected RWDX magic, found {:#010x}", magic),
            ));
        }
        let version = read_u32_le(data, &mut pos)?;
        if version != VERSION {
            return Err(Error::new(
                ErrorKind::UnsupportedVersion,
                format!("index file version {} is not supported", version),
            ));
        }
        let _flags = read_u32_le(data, &mut pos)?;
        let section_count = read_u32_le(data, &mut pos)? as u64;

        let dir_end = HEADER_LEN + section_count * DIR_ENTRY_LEN;
        if dir_end > data.len() as u64 {
            return Err(Error::corrupt("directory exceeds file length"));
        }

        let mut entries = Vec::with_capacity(section_count as usize);
        let mut prev_end = dir_end;
        for _ in 0..section_count {
            let kind = read_u32_le(data, &mut pos)?;
            let kind = SectionKind::from_u32(kind)
                .ok_or_else(|| Error::corrupt(format!("unknown section kind {}", kind)))?;
            let offset = read_u64_le(data, &mut pos)?;
            let length = read_u64_le(data, &mut pos)?;

            let end = offset
                .checked_add(length)
                .filter(|end| *end <= data.len() as u64)
                .ok_or_else(|| Error::corrupt("section extends past end of file"))?;
            if offset < prev_end {
                return Err(Error::corrupt("section offsets not monotonic"));
            }
            prev_end = end;
            entries.push(SectionEntry { kind, offset, length });
        }

        let mut dict = None;
        let mut meta = None;
        let mut postings_value = HashMap::new();
        let mut postings_year = HashMap::new();

        for entry in &entries {
            let body = &data[entry.offset as usize..(entry.offset + entry.length) as usize];
            match entry.kind {
                SectionKind::Dict => dict = Some(decode_dict(body)?),
                SectionKind::Meta => meta = Some(decode_meta(body)?),
                SectionKind::PostingsValue => postings_value = decode_value_section(body)?,
                SectionKind::PostingsYear => postings_year = decode_year_section(body)?,
            }
        }

        let dict = dict.ok_or_else(|| Error::corrupt("missing dictionary section"))?;
        let meta = meta.ok_or_else(|| Error::corrupt("missing meta section"))?;
        if postings_value.len() != meta.value_posting_count as usize
            || postings_year.len() != meta.year_posting_count as usize
        {
            return Err(Error::corrupt("posting counts disagree with meta section"));
        }

        let index = PeopleIndex::from_parts(postings_value, postings_year, meta.universe);
        info!(
            path = %path.as_ref().display(),
            universe = index.universe(),
            value_postings = index.value_posting_count(),
            year_postings = index.year_posting_count(),
            "loaded index file"
        );
        Ok((dict, index))
    }
}

fn decode_dict(body: &[u8]) -> Result<Dictionary> {
    let mut pos = 0;
    let attr_count = read_u32_le(body, &mut pos)? as usize;
    if attr_count > body.len() {
        return Err(Error::corrupt("attribute count exceeds section size"));
    }

    let mut attr_names = Vec::with_capacity(attr_count);
    let mut value_tables = Vec::with_capacity(attr_count);
    for _ in 0..attr_count {
        attr_names.push(varint::read_str(body, &mut pos)?);
        let value_count = read_u32_le(body, &mut pos)? as usize;
        if value_count > body.len() {
            return Err(Error::corrupt("value count exceeds section size"));
        }
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            values.push(varint::read_str(body, &mut pos)?);
        }
        value_tables.push(values);
    }

    // The person table is absent in files written before guids were
    // persisted; treat exhaustion here as an empty table.
    let mut person_guids = Vec::new();
    if pos < body.len() {
        let person_count = read_u32_le(body, &mut pos)? as usize;
        if person_count > body.len() {
            return Err(Error::corrupt("person count exceeds section size"));
        }
        person_guids.reserve(person_count);
        for _ in 0..person_count {
            person_guids.push(varint::read_str(body, &mut pos)?);
        }
    }

    Dictionary::import_snapshot(DictionarySnapshot {
        attr_names,
        value_tables,
        person_guids,
    })
}

fn decode_meta(body: &[u8]) -> Result<Meta> {
    let mut pos = 0;
    let universe = read_u64_le(body, &mut pos)?;
    let value_posting_count = read_u32_le(body, &mut pos)?;
    let year_posting_count = read_u32_le(body, &mut pos)?;
    Ok(Meta {
        universe,
        value_posting_count,
        year_posting_count,
    })
}

fn decode_value_section(body: &[u8]) -> Result<HashMap<AttrVal, Posting>> {
    let mut postings = HashMap::new();
    let mut pos = 0;
    while pos < body.len() {
        let attr = varint::read_u32(body, &mut pos)? as i32;
        let val = varint::read_u32(body, &mut pos)? as i32;
        let posting = codec::decode_posting(body, &mut pos)?;
        postings.insert(AttrVal::new(attr, val), posting);
    }
    Ok(postings)
}

fn decode_year_section(body: &[u8]) -> Result<HashMap<AttrValYear, Posting>> {
    let mut postings = HashMap::new();
    let mut pos = 0;
    while pos < body.len() {
        let attr = varint::read_u32(body, &mut pos)? as i32;
        let val = varint::read_u32(body, &mut pos)? as i32;
        let month = varint::read_u32(body, &mut pos)?;
        if !packable_month(month) {
            return Err(Error::corrupt(format!("malformed posting month {}", month)));
        }
        let posting = codec::decode_posting(body, &mut pos)?;
        postings.insert(AttrValYear::new(attr, val, month), posting);
    }
    Ok(postings)
}
