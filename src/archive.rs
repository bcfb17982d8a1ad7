//! Archive encode/decode for the four-region container.
//!
//! ```text
//! ┌──────────────┬─────────────────┬──────────────┬──────────────┐
//! │ Header (64)  │ Index (n × 26)  │ Data (…)     │ Footer (48)  │
//! └──────────────┴─────────────────┴──────────────┴──────────────┘
//! ```
//!
//! ```
//! use hdiff::archive::{decode, ArchiveBuilder};
//!
//! let bytes = ArchiveBuilder::new().chunk_size(4).push(b"hello world").finish();
//! let ar = decode(&bytes)?;
//! assert_eq!(ar.data, b"hello world");
//! assert_eq!(ar.entries().count(), 3);
//! # Ok::<(), hdiff::archive::ArchiveError>(())
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::footer::{Footer, FOOTER_SIZE};
use crate::hash::{fast_checksum, strong_hash, to_hex};
use crate::header::{has_magic, Header, HeaderFields, HEADER_SIZE, VERSION};
use crate::index::{self, IndexEntry, ENTRY_SIZE, MAX_CHUNK_LENGTH};
use crate::perf::hash_chunks;

/// Smallest well-formed archive: header plus footer.
pub const MIN_ARCHIVE_SIZE: usize = HEADER_SIZE + FOOTER_SIZE;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("archive too short: {len} bytes (need at least {MIN_ARCHIVE_SIZE})")]
    TooShort { len: usize },
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("header field {0} unreadable")]
    FieldUnreadable(&'static str),
    #[error("{region} region [{start}, {end}) exceeds footer start {limit}")]
    OutOfBounds { region: &'static str, start: u64, end: u64, limit: u64 },
}

// ── Decoded view ─────────────────────────────────────────────────────────────

/// Borrowed view over a structurally valid archive buffer.
#[derive(Debug, Clone)]
pub struct Archive<'a> {
    pub header: Header,
    pub index:  &'a [u8],
    pub data:   &'a [u8],
    pub footer: Footer,
    pre_footer: &'a [u8],
}

impl<'a> Archive<'a> {
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + 'a {
        index::entries(self.index)
    }

    /// Every byte covered by the footer's strong hash.
    pub fn pre_footer(&self) -> &'a [u8] {
        self.pre_footer
    }

    pub fn index_checksum_ok(&self) -> bool {
        fast_checksum(self.index) == self.footer.index_checksum
    }

    pub fn strong_hash_ok(&self) -> bool {
        strong_hash(self.pre_footer) == self.footer.strong_hash
    }
}

/// Lenient header decode: per-field `None` for unreadable values.
pub fn decode_fields(buf: &[u8]) -> HeaderFields {
    HeaderFields::decode(buf)
}

/// Strict decode.  Checks magic and layout bounds but not the footer's
/// digests; use [`crate::recovery::scan`] for a full diagnosis.
pub fn decode(buf: &[u8]) -> Result<Archive<'_>, ArchiveError> {
    if buf.len() < MIN_ARCHIVE_SIZE {
        return Err(ArchiveError::TooShort { len: buf.len() });
    }
    if !has_magic(buf) {
        return Err(ArchiveError::InvalidMagic);
    }

    let fields = HeaderFields::decode(buf);
    let index_offset = fields.index_offset.ok_or(ArchiveError::FieldUnreadable("index_offset"))?;
    let index_length = fields.index_length.ok_or(ArchiveError::FieldUnreadable("index_length"))?;
    let data_offset  = fields.data_offset.ok_or(ArchiveError::FieldUnreadable("data_offset"))?;
    let data_length  = fields.data_length.ok_or(ArchiveError::FieldUnreadable("data_length"))?;

    let footer_start = (buf.len() - FOOTER_SIZE) as u64;
    let check = |region, start: u64, len: u64| {
        let end = start + len;
        if start < HEADER_SIZE as u64 || end > footer_start {
            Err(ArchiveError::OutOfBounds { region, start, end, limit: footer_start })
        } else {
            Ok(start as usize..end as usize)
        }
    };
    let index_range = check("index", index_offset, index_length)?;
    let data_range  = check("data", data_offset, data_length)?;

    let header = Header::from_bytes(buf).ok_or(ArchiveError::FieldUnreadable("header"))?;
    let footer = Footer::from_tail(buf).ok_or(ArchiveError::TooShort { len: buf.len() })?;

    Ok(Archive {
        header,
        index:      &buf[index_range],
        data:       &buf[data_range],
        footer,
        pre_footer: &buf[..footer_start as usize],
    })
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Lay out `header || index || data || footer`.
///
/// Magic, version and reserved header bytes are taken from `header`; the four
/// layout fields are recomputed for the canonical placement (index directly
/// after the header, data directly after the index).
pub fn encode(header: &Header, index: &[u8], data: &[u8]) -> Vec<u8> {
    let mut header = header.clone();
    header.index_offset = HEADER_SIZE as u64;
    header.index_length = index.len() as u64;
    header.data_offset  = (HEADER_SIZE + index.len()) as u64;
    header.data_length  = data.len() as u64;

    let mut out = Vec::with_capacity(HEADER_SIZE + index.len() + data.len() + FOOTER_SIZE);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(index);
    out.extend_from_slice(data);

    let footer = Footer::compute(&out, index);
    out.extend_from_slice(&footer.to_bytes());
    out
}

// ── ArchiveBuilder ───────────────────────────────────────────────────────────

/// Splits a payload into fixed-size chunks, one index entry per chunk.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    header:     Header,
    chunk_size: usize,
    payload:    Vec<u8>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self { header: Header::new(), chunk_size: DEFAULT_CHUNK_SIZE, payload: Vec::new() }
    }

    /// Clamped to `1..=MAX_CHUNK_LENGTH` so every entry stays plausible.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_LENGTH as usize);
        self
    }

    /// Opaque bytes for the reserved header tail.
    pub fn reserved(mut self, bytes: &[u8]) -> Self {
        self.header.set_reserved_tail(bytes);
        self
    }

    pub fn push(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    pub fn index_table(&self) -> Vec<u8> {
        let chunks: Vec<&[u8]> = self.payload.chunks(self.chunk_size).collect();
        let digests = hash_chunks(&chunks);

        let mut table  = Vec::with_capacity(chunks.len() * ENTRY_SIZE);
        let mut offset = 0u64;
        for (chunk, digest) in chunks.iter().zip(&digests) {
            let mut prefix = [0u8; 8];
            prefix.copy_from_slice(&digest[..8]);
            let entry = IndexEntry::new(offset, chunk.len() as u32, prefix);
            table.extend_from_slice(entry.as_bytes());
            offset += chunk.len() as u64;
        }
        table
    }

    pub fn finish(self) -> Vec<u8> {
        let table = self.index_table();
        encode(&self.header, &table, &self.payload)
    }
}

// ── Golden sample ────────────────────────────────────────────────────────────

pub const GOLDEN_PAYLOAD: &[u8] = b"Hello, Hajimi!";

/// Raw (stored) zstd frame: single segment, 1-byte content size, one last
/// raw block.  Payload must be under 256 bytes.
fn stored_zstd_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x28, 0xB5, 0x2F, 0xFD, 0x20, payload.len() as u8];
    let block = ((payload.len() as u32) << 3) | 0x01;
    frame.extend_from_slice(&block.to_le_bytes()[..3]);
    frame.extend_from_slice(payload);
    frame
}

/// The project's minimal sample archive: one index entry, one stored zstd
/// frame of [`GOLDEN_PAYLOAD`].
pub fn minimal_archive() -> Vec<u8> {
    ArchiveBuilder::new().push(&stored_zstd_frame(GOLDEN_PAYLOAD)).finish()
}

#[derive(Debug, Clone, Serialize)]
pub struct GoldenLayout {
    pub header_len:      usize,
    pub index_entry_len: usize,
    pub footer_len:      usize,
    pub index_count:     u64,
    pub index_offset:    u64,
    pub index_length:    u64,
    pub data_offset:     u64,
    pub data_length:     u64,
    pub footer_offset:   u64,
}

/// Reference digests and layout for an archive, as published next to the
/// golden sample.
#[derive(Debug, Clone, Serialize)]
pub struct GoldenVector {
    pub version:          String,
    pub file_size:        usize,
    pub hash_algo:        &'static str,
    pub strong_hash_hex:  String,
    pub index_xxh64_hex:  String,
    pub layout:           GoldenLayout,
}

impl GoldenVector {
    pub fn of(buf: &[u8]) -> Result<Self, ArchiveError> {
        let ar = decode(buf)?;
        let version = if ar.header.version == VERSION {
            "0.9.1".to_owned()
        } else {
            to_hex(&ar.header.version)
        };
        Ok(Self {
            version,
            file_size:       buf.len(),
            hash_algo:       "blake3-256",
            strong_hash_hex: to_hex(&ar.footer.strong_hash),
            index_xxh64_hex: to_hex(&ar.footer.index_checksum),
            layout: GoldenLayout {
                header_len:      HEADER_SIZE,
                index_entry_len: ENTRY_SIZE,
                footer_len:      FOOTER_SIZE,
                index_count:     ar.header.index_length / ENTRY_SIZE as u64,
                index_offset:    ar.header.index_offset,
                index_length:    ar.header.index_length,
                data_offset:     ar.header.data_offset,
                data_length:     ar.header.data_length,
                footer_offset:   (buf.len() - FOOTER_SIZE) as u64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_frame_layout() {
        let f = stored_zstd_frame(GOLDEN_PAYLOAD);
        assert_eq!(f.len(), 23);
        assert_eq!(&f[..6], &[0x28, 0xB5, 0x2F, 0xFD, 0x20, 14]);
        assert_eq!(&f[6..9], &[0x71, 0x00, 0x00]);
        assert_eq!(&f[9..], GOLDEN_PAYLOAD);
    }

    #[test]
    fn minimal_archive_layout() {
        let bytes = minimal_archive();
        assert_eq!(bytes.len(), 64 + 26 + 23 + 48);
        let g = GoldenVector::of(&bytes).unwrap();
        assert_eq!(g.version, "0.9.1");
        assert_eq!(g.layout.index_count, 1);
        assert_eq!(g.layout.data_offset, 90);
        assert_eq!(g.layout.footer_offset, 113);

        let ar = decode(&bytes).unwrap();
        let e  = ar.entries().next().unwrap();
        assert_eq!(e.chunk_length(), 23);
        assert!(ar.index_checksum_ok());
        assert!(ar.strong_hash_ok());
    }

    #[test]
    fn decode_errors() {
        assert_eq!(decode(&[0u8; 10]).unwrap_err(), ArchiveError::TooShort { len: 10 });

        let mut bad = minimal_archive();
        bad[..4].copy_from_slice(b"BAD!");
        assert_eq!(decode(&bad).unwrap_err(), ArchiveError::InvalidMagic);

        let mut bad = minimal_archive();
        bad[0x1B..0x23].copy_from_slice(&u64::MAX.to_le_bytes());
        assert_eq!(decode(&bad).unwrap_err(), ArchiveError::FieldUnreadable("data_offset"));

        let mut bad = minimal_archive();
        bad[0x23..0x2B].copy_from_slice(&1000u64.to_le_bytes());
        assert!(matches!(decode(&bad), Err(ArchiveError::OutOfBounds { region: "data", .. })));
    }

    #[test]
    fn encode_keeps_reserved_header_bytes() {
        let bytes = ArchiveBuilder::new().reserved(b"meta").push(b"x").finish();
        let ar = decode(&bytes).unwrap();
        assert_eq!(&ar.header.reserved_tail()[..4], b"meta");
    }
}
