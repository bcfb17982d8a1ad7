//! Read-only integrity scanner.
//!
//! `scan()` never fails: a malformed buffer is exactly what it exists to
//! describe, so every problem is recorded in the returned [`ScanReport`].
//!
//! ## Checks, in order
//!
//! 1. Magic.  A mismatch (E1001) ends the scan; nothing else is trusted.
//! 2. Header bounds against the footer start (E1002).  A buffer shorter than
//!    header plus footer has no footer at all (a second E1002).
//! 3. Recoverable share of the declared data region; missing tail bytes
//!    become a hole.
//! 4. With a footer and a sound header: index checksum (E1003) and strong
//!    hash of the pre-footer region (E1004).

use serde::Serialize;

use crate::archive::decode_fields;
use crate::footer::{Footer, FOOTER_SIZE};
use crate::hash::{fast_checksum, strong_hash, to_hex};
use crate::header::{has_magic, HeaderFields, HEADER_SIZE};

use super::holes::{merge_holes, Hole, MISSING_BYTES};
use super::{ErrorCode, ScanError};

// ── Report ────────────────────────────────────────────────────────────────────

/// Header fields as found.  `suspect` is set when they failed bounds checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderReport {
    pub index_offset: Option<u64>,
    pub index_length: Option<u64>,
    pub data_offset:  Option<u64>,
    pub data_length:  Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub suspect:      bool,
}

/// Footer comparisons.  `None` when the check could not run.
///
/// `*_expected_hex` is the digest recomputed from the buffer, `*_actual_hex`
/// the value stored in the footer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Checks {
    pub index_ok:                 Option<bool>,
    pub strong_ok:                Option<bool>,
    pub index_xxh64_expected_hex: Option<String>,
    pub index_xxh64_actual_hex:   Option<String>,
    pub blake3_expected_hex:      Option<String>,
    pub blake3_actual_hex:        Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub ok:                bool,
    pub magic_ok:          bool,
    pub bytes:             u64,
    pub header:            Option<HeaderReport>,
    pub footer_present:    bool,
    pub recoverable_pct:   f64,
    pub recoverable_bytes: u64,
    pub lost_regions:      Vec<Hole>,
    pub checks:            Checks,
    pub errors:            Vec<ScanError>,
}

impl ScanReport {
    pub fn has_error(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn header_ok(&self) -> bool {
        self.header.as_ref().is_some_and(|h| !h.suspect)
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        let codes: Vec<&str> = self.errors.iter().map(|e| e.code.as_str()).collect();
        format!(
            "{}: {} bytes, {:.2}% of data recoverable, {} hole(s), errors [{}]",
            if self.ok { "OK" } else { "DAMAGED" },
            self.bytes,
            self.recoverable_pct,
            self.lost_regions.len(),
            codes.join(", "),
        )
    }
}

/// Round to two decimals, half away from zero.
fn round_pct(ratio: f64) -> f64 {
    (ratio * 10_000.0).round() / 100.0
}

/// Whether `fields` describe a layout that fits before `limit`.
pub(crate) fn bounds_ok(fields: &HeaderFields, limit: u64) -> bool {
    layout_ok(fields, limit)
        && fields.all().is_some_and(|(_, _, data_off, data_len)| data_off + data_len <= limit)
}

/// Every bound except the end of the data region, which a truncated buffer
/// is allowed to cut short.
fn layout_ok(fields: &HeaderFields, limit: u64) -> bool {
    let Some((idx_off, idx_len, data_off, _)) = fields.all() else {
        return false;
    };
    idx_off >= HEADER_SIZE as u64
        && idx_off + idx_len <= limit
        && data_off <= limit
        && idx_off <= data_off
}

// ── Scanner ───────────────────────────────────────────────────────────────────

pub fn scan(buf: &[u8]) -> ScanReport {
    let len = buf.len();
    let footer_present = len >= HEADER_SIZE + FOOTER_SIZE;

    if !has_magic(buf) {
        return ScanReport {
            ok:                false,
            magic_ok:          false,
            bytes:             len as u64,
            header:            None,
            footer_present,
            recoverable_pct:   0.0,
            recoverable_bytes: 0,
            lost_regions:      Vec::new(),
            checks:            Checks::default(),
            errors:            vec![ScanError::new(ErrorCode::MagicMismatch, "magic mismatch")],
        };
    }

    let mut errors = Vec::new();
    let fields       = decode_fields(buf);
    let footer_start = if footer_present { len - FOOTER_SIZE } else { len };

    let header_ok = bounds_ok(&fields, footer_start as u64);
    if !header_ok {
        errors.push(ScanError::new(ErrorCode::Bounds, "header offsets out of bounds or unreadable"));
    }

    // Recoverable share of the data region.  A header whose only fault is a
    // data region running past the available bytes still locates the data,
    // so the missing tail is reported as a hole.
    //
    // This gate is looser than `header_ok`.  Scanners before 0.9.1 gated on
    // `header_ok` and reported 0% with no holes for a truncated archive;
    // this report differs from theirs for such inputs.
    let mut recoverable_bytes = 0u64;
    let mut recoverable_pct   = 0.0;
    let mut holes             = Vec::new();
    let locates_data = layout_ok(&fields, footer_start as u64);
    if let (true, Some((_, _, data_off, data_len))) = (locates_data, fields.all()) {
        if data_len == 0 {
            recoverable_pct = 100.0;
        } else {
            let expected_end  = data_off + data_len;
            let available_end = expected_end.min(footer_start as u64);
            recoverable_bytes = available_end.saturating_sub(data_off).min(data_len);
            recoverable_pct   = round_pct(recoverable_bytes as f64 / data_len as f64);
            if recoverable_bytes < data_len {
                holes.push(Hole::new(data_off + recoverable_bytes, expected_end, Some(MISSING_BYTES)));
            }
        }
    }

    let mut checks = Checks::default();
    if !footer_present {
        errors.push(ScanError::new(ErrorCode::Bounds, "footer missing (file truncated)"));
    } else if let (true, Some((idx_off, idx_len, _, _)), Some(footer)) =
        (header_ok, fields.all(), Footer::from_tail(buf))
    {
        let index  = &buf[idx_off as usize..(idx_off + idx_len) as usize];
        let actual = fast_checksum(index);
        let index_ok = actual == footer.index_checksum;
        checks.index_ok                 = Some(index_ok);
        checks.index_xxh64_expected_hex = Some(to_hex(&actual));
        checks.index_xxh64_actual_hex   = Some(to_hex(&footer.index_checksum));
        if !index_ok {
            errors.push(ScanError::new(ErrorCode::IndexChecksum, "index checksum mismatch"));
        }

        let digest    = strong_hash(&buf[..footer_start]);
        let strong_ok = digest == footer.strong_hash;
        checks.strong_ok           = Some(strong_ok);
        checks.blake3_expected_hex = Some(to_hex(&digest));
        checks.blake3_actual_hex   = Some(to_hex(&footer.strong_hash));
        if !strong_ok {
            errors.push(ScanError::new(ErrorCode::StrongHash, "file BLAKE3 mismatch"));
        }
    }

    ScanReport {
        ok:           errors.is_empty(),
        magic_ok:     true,
        bytes:        len as u64,
        header:       Some(HeaderReport {
            index_offset: fields.index_offset,
            index_length: fields.index_length,
            data_offset:  fields.data_offset,
            data_length:  fields.data_length,
            suspect:      !header_ok,
        }),
        footer_present,
        recoverable_pct,
        recoverable_bytes,
        lost_regions: merge_holes(holes),
        checks,
        errors,
    }
}

/// Convenience: read and scan a file.
pub fn scan_file(path: &std::path::Path) -> std::io::Result<ScanReport> {
    Ok(scan(&std::fs::read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{minimal_archive, ArchiveBuilder};

    #[test]
    fn fresh_archive_is_clean() {
        let r = scan(&minimal_archive());
        assert!(r.ok, "{:?}", r.errors);
        assert_eq!(r.recoverable_pct, 100.0);
        assert_eq!(r.recoverable_bytes, 23);
        assert!(r.lost_regions.is_empty());
        assert_eq!(r.checks.index_ok, Some(true));
        assert_eq!(r.checks.strong_ok, Some(true));
    }

    #[test]
    fn empty_data_region_counts_as_whole() {
        let r = scan(&ArchiveBuilder::new().finish());
        assert!(r.ok);
        assert_eq!(r.recoverable_pct, 100.0);
        assert_eq!(r.recoverable_bytes, 0);
    }

    #[test]
    fn short_buffer_reports_missing_footer() {
        let mut buf = minimal_archive();
        buf.truncate(80);
        let r = scan(&buf);
        assert!(r.magic_ok);
        assert!(!r.footer_present);
        assert_eq!(r.errors.iter().filter(|e| e.code == ErrorCode::Bounds).count(), 2);
        assert!(r.header.unwrap().suspect);
        assert_eq!(r.checks, Checks::default());
    }

    #[test]
    fn data_past_footer_becomes_hole() {
        let mut buf = minimal_archive();
        buf[0x23..0x2B].copy_from_slice(&40u64.to_le_bytes());
        let r = scan(&buf);
        assert!(r.has_error(ErrorCode::Bounds));
        assert_eq!(r.lost_regions, vec![Hole::new(113, 130, Some(MISSING_BYTES))]);
        assert_eq!(r.recoverable_bytes, 23);
        assert_eq!(r.recoverable_pct, 57.5);
        assert_eq!(r.checks.index_ok, None);
    }

    #[test]
    fn index_past_footer_locates_nothing() {
        let mut buf = minimal_archive();
        buf[0x13..0x1B].copy_from_slice(&4000u64.to_le_bytes());
        let r = scan(&buf);
        assert!(r.has_error(ErrorCode::Bounds));
        assert!(r.lost_regions.is_empty());
        assert_eq!(r.recoverable_pct, 0.0);
    }

    #[test]
    fn rounding() {
        assert_eq!(round_pct(1.0 / 3.0), 33.33);
        assert_eq!(round_pct(2.0 / 3.0), 66.67);
    }

    #[test]
    fn report_json_shape() {
        let v = serde_json::to_value(scan(&minimal_archive())).unwrap();
        assert_eq!(v["header"]["index_offset"], 64);
        assert!(v["header"].get("suspect").is_none());
        assert!(v["checks"]["blake3_expected_hex"].is_string());
        assert_eq!(v["errors"].as_array().unwrap().len(), 0);
    }
}
