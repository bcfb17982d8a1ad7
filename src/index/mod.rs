//! Index table: a packed sequence of 26-byte entries.
//!
//! | Offset | Size | Field | Read by recovery |
//! |--------|------|-------|------------------|
//! | +0  | 8 | source offset (u64 LE)            | no  |
//! | +8  | 2 | flags (u16 LE)                    | no  |
//! | +10 | 4 | chunk length (u32 LE)             | yes |
//! | +14 | 8 | strong-hash prefix of the chunk   | no  |
//! | +22 | 4 | reserved (u32 LE, zero)           | yes |
//!
//! Only the chunk length and reserved fields are interpreted when reading;
//! the other 18 bytes are opaque and copied verbatim.

use byteorder::{ByteOrder, LittleEndian};

pub const ENTRY_SIZE: usize = 26;

/// Sanity ceiling for a single chunk length.
pub const MAX_CHUNK_LENGTH: u32 = 128 * 1024 * 1024;

const OFF_SOURCE_OFFSET: usize = 0;
const OFF_FLAGS:         usize = 8;
const OFF_CHUNK_LENGTH:  usize = 10;
const OFF_HASH_PREFIX:   usize = 14;
const OFF_RESERVED:      usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry([u8; ENTRY_SIZE]);

impl IndexEntry {
    /// Entry as written by [`crate::archive::ArchiveBuilder`].
    pub fn new(source_offset: u64, chunk_length: u32, hash_prefix: [u8; 8]) -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        LittleEndian::write_u64(&mut raw[OFF_SOURCE_OFFSET..OFF_FLAGS], source_offset);
        LittleEndian::write_u16(&mut raw[OFF_FLAGS..OFF_CHUNK_LENGTH], 0);
        LittleEndian::write_u32(&mut raw[OFF_CHUNK_LENGTH..OFF_HASH_PREFIX], chunk_length);
        raw[OFF_HASH_PREFIX..OFF_RESERVED].copy_from_slice(&hash_prefix);
        Self(raw)
    }

    /// Wrap raw bytes; `None` unless exactly 26 bytes are given.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; ENTRY_SIZE] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ENTRY_SIZE] {
        &self.0
    }

    pub fn chunk_length(&self) -> u32 {
        LittleEndian::read_u32(&self.0[OFF_CHUNK_LENGTH..OFF_HASH_PREFIX])
    }

    pub fn reserved(&self) -> u32 {
        LittleEndian::read_u32(&self.0[OFF_RESERVED..])
    }

    /// Best-effort structural test: reserved reads zero and the chunk length
    /// is non-zero and below the ceiling.
    pub fn is_plausible(&self) -> bool {
        let len = self.chunk_length();
        self.reserved() == 0 && len > 0 && len <= MAX_CHUNK_LENGTH
    }
}

/// Iterate whole entries of an index table; a trailing partial entry is
/// ignored.
pub fn entries(table: &[u8]) -> impl Iterator<Item = IndexEntry> + '_ {
    table.chunks_exact(ENTRY_SIZE).filter_map(IndexEntry::from_slice)
}

/// Number of leading plausible entries in `body`, stopping at the first
/// implausible one.
pub fn plausible_prefix_len(body: &[u8]) -> usize {
    entries(body).take_while(IndexEntry::is_plausible).count()
}

/// Guess an index length in bytes for a body that follows the header.
///
/// Falls back to a single entry when none qualify but the body can hold
/// one, and to zero otherwise.
pub fn infer_index_length(body: &[u8]) -> usize {
    match plausible_prefix_len(body) {
        0 if body.len() >= ENTRY_SIZE => ENTRY_SIZE,
        0                             => 0,
        n                             => n * ENTRY_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_bearing_offsets() {
        let e = IndexEntry::new(7, 0x0102_0304, [0xAA; 8]);
        let b = e.as_bytes();
        assert_eq!(&b[10..14], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&b[22..26], &[0, 0, 0, 0]);
        assert_eq!(&b[14..22], &[0xAA; 8]);
        assert!(e.is_plausible());
    }

    #[test]
    fn plausibility_rules() {
        assert!(!IndexEntry::new(0, 0, [0; 8]).is_plausible());
        assert!(IndexEntry::new(0, MAX_CHUNK_LENGTH, [0; 8]).is_plausible());
        assert!(!IndexEntry::new(0, MAX_CHUNK_LENGTH + 1, [0; 8]).is_plausible());

        let mut raw = *IndexEntry::new(0, 10, [0; 8]).as_bytes();
        raw[24] = 1;
        assert!(!IndexEntry::from_slice(&raw).unwrap().is_plausible());
    }

    #[test]
    fn inference_stops_at_first_bad_entry() {
        let mut body = Vec::new();
        body.extend_from_slice(IndexEntry::new(0, 10, [0; 8]).as_bytes());
        body.extend_from_slice(IndexEntry::new(10, 20, [0; 8]).as_bytes());
        body.extend_from_slice(&[0xFF; ENTRY_SIZE]);
        body.extend_from_slice(IndexEntry::new(30, 5, [0; 8]).as_bytes());
        assert_eq!(plausible_prefix_len(&body), 2);
        assert_eq!(infer_index_length(&body), 2 * ENTRY_SIZE);
    }

    #[test]
    fn inference_fallbacks() {
        assert_eq!(infer_index_length(&[0xFF; 40]), ENTRY_SIZE);
        assert_eq!(infer_index_length(&[0u8; 25]), 0);
        assert_eq!(infer_index_length(&[]), 0);
    }
}
