//! Per-posting body codecs: gap-coded id arrays and native bitmap blobs.

use croaring::{Bitmap, Portable};

use crate::core::error::{Error, Result};
use crate::core::types::PersonId;
use crate::posting::posting::Posting;
use crate::store::varint;

/// Array posting: count, then prev-delta gaps.
pub const CODEC_IDS: u64 = 1;
/// Bitmap posting: byte length, then the portable Roaring serialization.
pub const CODEC_BITMAP: u64 = 2;

/// Writes the codec tag and body for one posting.
pub fn encode_posting(buf: &mut Vec<u8>, posting: &Posting) {
    match posting {
        Posting::Ids(ids) => {
            varint::write_u64(buf, CODEC_IDS);
            encode_ids(buf, ids);
        }
        Posting::Bits(bits) => {
            varint::write_u64(buf, CODEC_BITMAP);
            let bytes = bits.serialize::<Portable>();
            varint::write_u64(buf, bytes.len() as u64);
            buf.extend_from_slice(&bytes);
        }
    }
}

/// Reads the codec tag and body written by [`encode_posting`].
pub fn decode_posting(data: &[u8], pos: &mut usize) -> Result<Posting> {
    match varint::read_u64(data, pos)? {
        CODEC_IDS => Ok(Posting::from_sorted_ids(decode_ids(data, pos)?)),
        CODEC_BITMAP => {
            let len = varint::read_u64(data, pos)? as usize;
            let end = pos
                .checked_add(len)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| Error::corrupt("bitmap blob out of bounds"))?;
            let bitmap = Bitmap::try_deserialize::<Portable>(&data[*pos..end])
                .ok_or_else(|| Error::corrupt("unreadable bitmap blob"))?;
            *pos = end;
            Ok(Posting::Bits(bitmap))
        }
        other => Err(Error::corrupt(format!("unknown posting codec {}", other))),
    }
}

/// Count, then per-id gaps against the previous id, starting from 0.
pub fn encode_ids(buf: &mut Vec<u8>, ids: &[PersonId]) {
    varint::write_u64(buf, ids.len() as u64);
    let mut prev = 0u32;
    for &id in ids {
        varint::write_u64(buf, (id - prev) as u64);
        prev = id;
    }
}

pub fn decode_ids(data: &[u8], pos: &mut usize) -> Result<Vec<PersonId>> {
    let count = varint::read_u64(data, pos)? as usize;
    // Every gap takes at least one byte.
    if count > data.len() - *pos {
        return Err(Error::corrupt("id count exceeds section size"));
    }

    let mut ids = Vec::with_capacity(count);
    let mut prev = 0u64;
    for i in 0..count {
        let gap = varint::read_u64(data, pos)?;
        if i > 0 && gap == 0 {
            return Err(Error::corrupt("duplicate id in gap-coded posting"));
        }
        prev += gap;
        let id = u32::try_from(prev).map_err(|_| Error::corrupt("person id exceeds u32"))?;
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_codec_roundtrip() {
        for ids in [vec![], vec![0], vec![0, 1, 2], vec![5, 1_000, 4_000_000_000]] {
            let mut buf = Vec::new();
            encode_ids(&mut buf, &ids);
            let mut pos = 0;
            assert_eq!(decode_ids(&buf, &mut pos).unwrap(), ids);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn duplicate_gap_is_corrupt() {
        let mut buf = Vec::new();
        varint::write_u64(&mut buf, 2);
        varint::write_u64(&mut buf, 7);
        varint::write_u64(&mut buf, 0);
        let mut pos = 0;
        assert!(decode_ids(&buf, &mut pos).is_err());
    }

    #[test]
    fn posting_roundtrip_both_codecs() {
        let sparse = Posting::from_sorted_ids(vec![1, 9, 70_000]);
        let dense = Posting::Bits(Bitmap::of(&(0..10_000).collect::<Vec<u32>>()));

        for posting in [sparse, dense] {
            let mut buf = Vec::new();
            encode_posting(&mut buf, &posting);
            let mut pos = 0;
            let decoded = decode_posting(&buf, &mut pos).unwrap();
            assert_eq!(pos, buf.len());
            assert_eq!(decoded, posting);
        }
    }

    #[test]
    fn unknown_codec_is_corrupt() {
        let mut buf = Vec::new();
        varint::write_u64(&mut buf, 9);
        let mut pos = 0;
        assert!(decode_posting(&buf, &mut pos).is_err());
    }
}
