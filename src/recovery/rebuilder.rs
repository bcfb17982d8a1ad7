//! Structural repair of a damaged archive.
//!
//! The rebuilt archive is internally consistent and passes its own scan.
//! That is all it promises: bytes that were damaged stay damaged, and an
//! inferred layout may split index and data differently from the original.
//! The [`Provenance`] flag in the actions record says which case applied.
//!
//! Every pre-footer byte after the header is carried over verbatim; only the
//! magic, version, four layout fields and the footer are rewritten.

use log::debug;
use serde::Serialize;

use crate::footer::{Footer, FOOTER_SIZE};
use crate::header::{Header, HeaderFields, HEADER_SIZE};
use crate::index::{infer_index_length, ENTRY_SIZE};

use super::scanner::{bounds_ok, scan, ScanReport};
use super::ErrorCode;

/// Where the rebuilt header's layout fields came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Declared fields passed the plausibility checks and were kept.
    Trusted,
    /// Declared fields were unusable; layout guessed from the index entries.
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildActions {
    pub footer_present_in_input: bool,
    pub header:                  Provenance,
    pub header_inferred:         bool,
    pub index_len:               u64,
    pub data_len:                u64,
    pub wrote_footer:            bool,
    pub restored_version:        bool,
}

#[derive(Debug, Clone)]
pub struct Rebuilt {
    pub archive:        Vec<u8>,
    pub original_scan:  ScanReport,
    pub recovered_scan: ScanReport,
    pub actions:        RebuildActions,
}

#[derive(Debug, Clone)]
pub enum RebuildResult {
    /// Magic mismatch: nothing in the buffer can be trusted.
    Refused { reason: ErrorCode, original_scan: ScanReport },
    Rebuilt(Rebuilt),
}

impl RebuildResult {
    pub fn ok(&self) -> bool {
        matches!(self, RebuildResult::Rebuilt(_))
    }

    pub fn archive(&self) -> Option<&[u8]> {
        match self {
            RebuildResult::Rebuilt(r)     => Some(&r.archive),
            RebuildResult::Refused { .. } => None,
        }
    }

    pub fn original_scan(&self) -> &ScanReport {
        match self {
            RebuildResult::Rebuilt(r)                    => &r.original_scan,
            RebuildResult::Refused { original_scan, .. } => original_scan,
        }
    }

    pub fn recovered_scan(&self) -> Option<&ScanReport> {
        match self {
            RebuildResult::Rebuilt(r)     => Some(&r.recovered_scan),
            RebuildResult::Refused { .. } => None,
        }
    }

    /// Serializable summary, without the archive bytes.
    pub fn report(&self) -> RebuildReport<'_> {
        match self {
            RebuildResult::Rebuilt(r) => RebuildReport {
                ok:             true,
                reason:         None,
                actions:        Some(&r.actions),
                original_scan:  &r.original_scan,
                recovered_scan: Some(&r.recovered_scan),
            },
            RebuildResult::Refused { reason, original_scan } => RebuildReport {
                ok:             false,
                reason:         Some(*reason),
                actions:        None,
                original_scan,
                recovered_scan: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RebuildReport<'a> {
    pub ok:             bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason:         Option<ErrorCode>,
    pub actions:        Option<&'a RebuildActions>,
    pub original_scan:  &'a ScanReport,
    pub recovered_scan: Option<&'a ScanReport>,
}

/// Declared layout, if it is readable, canonical in shape and fits in
/// `pre_len` bytes.
fn plausible_layout(fields: &HeaderFields, pre_len: u64) -> Option<(u64, u64, u64, u64)> {
    let (idx_off, idx_len, data_off, data_len) = fields.all()?;
    let canonical = idx_len % ENTRY_SIZE as u64 == 0 && data_off == idx_off + idx_len;
    (canonical && bounds_ok(fields, pre_len)).then_some((idx_off, idx_len, data_off, data_len))
}

pub fn rebuild(buf: &[u8]) -> RebuildResult {
    let original_scan = scan(buf);
    if !original_scan.magic_ok {
        debug!("rebuild refused: magic mismatch");
        return RebuildResult::Refused { reason: ErrorCode::MagicMismatch, original_scan };
    }

    let footer_present = buf.len() >= HEADER_SIZE + FOOTER_SIZE;
    let footer_start   = if footer_present { buf.len() - FOOTER_SIZE } else { buf.len() };

    let mut pre_footer = buf[..footer_start].to_vec();
    if pre_footer.len() < HEADER_SIZE {
        pre_footer.resize(HEADER_SIZE, 0);
    }
    let pre_len = pre_footer.len() as u64;

    let fields = HeaderFields::decode(&pre_footer);
    let (provenance, (idx_off, idx_len, data_off, data_len)) =
        match plausible_layout(&fields, pre_len) {
            Some(layout) => (Provenance::Trusted, layout),
            None => {
                let idx_len  = infer_index_length(&pre_footer[HEADER_SIZE..]) as u64;
                let data_off = HEADER_SIZE as u64 + idx_len;
                debug!("header implausible, inferred index length {idx_len}");
                (Provenance::Inferred, (HEADER_SIZE as u64, idx_len, data_off, pre_len - data_off))
            }
        };

    let mut header = Header::over_bytes(&pre_footer);
    header.canonicalize();
    header.index_offset = idx_off;
    header.index_length = idx_len;
    header.data_offset  = data_off;
    header.data_length  = data_len;
    pre_footer[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    let index  = &pre_footer[idx_off as usize..(idx_off + idx_len) as usize];
    let footer = Footer::compute(&pre_footer, index);

    let mut archive = pre_footer;
    archive.extend_from_slice(&footer.to_bytes());
    let recovered_scan = scan(&archive);

    RebuildResult::Rebuilt(Rebuilt {
        archive,
        original_scan,
        recovered_scan,
        actions: RebuildActions {
            footer_present_in_input: footer_present,
            header:                  provenance,
            header_inferred:         provenance == Provenance::Inferred,
            index_len:               idx_len,
            data_len,
            wrote_footer:            true,
            restored_version:        true,
        },
    })
}
