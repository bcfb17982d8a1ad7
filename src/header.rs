//! Fixed 64-byte archive header.
//!
//! ```text
//! 0x00  magic          4   "HAJI"
//! 0x04  version        4   canonical stamp 00 09 00 01
//! 0x08  reserved       3
//! 0x0B  index_offset   8   u64 LE
//! 0x13  index_length   8   u64 LE
//! 0x1B  data_offset    8   u64 LE
//! 0x23  data_length    8   u64 LE
//! 0x2B  reserved       21
//! ```
//!
//! Reserved bytes are opaque: a header read from disk writes them back
//! unchanged.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

pub const MAGIC:       &[u8; 4] = b"HAJI";
pub const VERSION:     [u8; 4]  = [0x00, 0x09, 0x00, 0x01];
pub const HEADER_SIZE: usize    = 64;

pub const OFF_VERSION:      usize = 0x04;
pub const OFF_INDEX_OFFSET: usize = 0x0B;
pub const OFF_INDEX_LENGTH: usize = 0x13;
pub const OFF_DATA_OFFSET:  usize = 0x1B;
pub const OFF_DATA_LENGTH:  usize = 0x23;

/// Largest field value reported as readable; JSON consumers hold numbers as
/// doubles.
pub const MAX_FIELD_VALUE: u64 = (1 << 53) - 1;

/// Read a u64 LE field at `off`, or `None` when the bytes are out of range or
/// the value is not exactly representable in a report.
pub fn read_field(buf: &[u8], off: usize) -> Option<u64> {
    let bytes = buf.get(off..off.checked_add(8)?)?;
    let value = LittleEndian::read_u64(bytes);
    (value <= MAX_FIELD_VALUE).then_some(value)
}

/// Whether `buf` starts with the canonical magic.
pub fn has_magic(buf: &[u8]) -> bool {
    buf.get(..4) == Some(&MAGIC[..])
}

// ── Lenient field view ───────────────────────────────────────────────────────

/// The four layout fields as decoded from a possibly damaged buffer.
/// `None` marks an unreadable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderFields {
    pub index_offset: Option<u64>,
    pub index_length: Option<u64>,
    pub data_offset:  Option<u64>,
    pub data_length:  Option<u64>,
}

impl HeaderFields {
    /// Decode without validating anything; never panics.
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            index_offset: read_field(buf, OFF_INDEX_OFFSET),
            index_length: read_field(buf, OFF_INDEX_LENGTH),
            data_offset:  read_field(buf, OFF_DATA_OFFSET),
            data_length:  read_field(buf, OFF_DATA_LENGTH),
        }
    }

    /// All four fields, if every one is readable.
    pub fn all(&self) -> Option<(u64, u64, u64, u64)> {
        Some((self.index_offset?, self.index_length?, self.data_offset?, self.data_length?))
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic:        [u8; 4],
    pub version:      [u8; 4],
    pub index_offset: u64,
    pub index_length: u64,
    pub data_offset:  u64,
    pub data_length:  u64,
    /// Backing bytes; typed fields are stamped over it on write.
    raw: [u8; HEADER_SIZE],
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Header {
    /// Canonical magic and version, zero layout, zero reserved bytes.
    pub fn new() -> Self {
        Self {
            magic:        *MAGIC,
            version:      VERSION,
            index_offset: HEADER_SIZE as u64,
            index_length: 0,
            data_offset:  HEADER_SIZE as u64,
            data_length:  0,
            raw:          [0u8; HEADER_SIZE],
        }
    }

    /// Parse a header from the first 64 bytes of `buf`.  Returns `None` when
    /// the buffer is too short or a field is unreadable; magic and version
    /// are taken as found.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let head = buf.get(..HEADER_SIZE)?;
        let (index_offset, index_length, data_offset, data_length) =
            HeaderFields::decode(head).all()?;

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(head);
        let mut magic   = [0u8; 4];
        let mut version = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        version.copy_from_slice(&raw[OFF_VERSION..OFF_VERSION + 4]);

        Some(Self { magic, version, index_offset, index_length, data_offset, data_length, raw })
    }

    /// Header built over existing bytes (padded with zeros when shorter than
    /// 64), keeping every reserved byte.  Typed fields start out as decoded,
    /// falling back to zero when unreadable.
    pub fn over_bytes(buf: &[u8]) -> Self {
        let mut raw = [0u8; HEADER_SIZE];
        let n = buf.len().min(HEADER_SIZE);
        raw[..n].copy_from_slice(&buf[..n]);

        let fields = HeaderFields::decode(&raw);
        let mut magic   = [0u8; 4];
        let mut version = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        version.copy_from_slice(&raw[OFF_VERSION..OFF_VERSION + 4]);

        Self {
            magic,
            version,
            index_offset: fields.index_offset.unwrap_or(0),
            index_length: fields.index_length.unwrap_or(0),
            data_offset:  fields.data_offset.unwrap_or(0),
            data_length:  fields.data_length.unwrap_or(0),
            raw,
        }
    }

    /// Stamp the canonical magic and version.
    pub fn canonicalize(&mut self) {
        self.magic   = *MAGIC;
        self.version = VERSION;
    }

    /// Set the reserved bytes in `0x2B..0x40` (21 bytes max).
    pub fn set_reserved_tail(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(HEADER_SIZE - 0x2B);
        self.raw[0x2B..0x2B + n].copy_from_slice(&bytes[..n]);
    }

    pub fn reserved_tail(&self) -> &[u8] {
        &self.raw[0x2B..]
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = self.raw;
        out[..4].copy_from_slice(&self.magic);
        out[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version);
        LittleEndian::write_u64(&mut out[OFF_INDEX_OFFSET..OFF_INDEX_OFFSET + 8], self.index_offset);
        LittleEndian::write_u64(&mut out[OFF_INDEX_LENGTH..OFF_INDEX_LENGTH + 8], self.index_length);
        LittleEndian::write_u64(&mut out[OFF_DATA_OFFSET..OFF_DATA_OFFSET + 8],   self.data_offset);
        LittleEndian::write_u64(&mut out[OFF_DATA_LENGTH..OFF_DATA_LENGTH + 8],   self.data_length);
        out
    }

}
