//! Corruption diagnosis and structural repair.
//!
//! | Step | Entry point | Mutates input |
//! |------|-------------|---------------|
//! | Diagnose | [`scan`] | never |
//! | Normalise holes | [`merge_holes`] | never |
//! | Repair | [`rebuild`] | never; returns a new buffer |
//! | Damage (tests, drills) | [`inject`] | never; returns a new buffer |
//!
//! ## Error codes
//!
//! | Code | Meaning | Rebuild |
//! |------|---------|---------|
//! | E1001 | magic mismatch | refused |
//! | E1002 | header bounds violated, or footer missing | layout inferred |
//! | E1003 | index checksum mismatch | footer recomputed |
//! | E1004 | strong hash mismatch | footer recomputed |

use serde::Serialize;
use std::fmt;

pub mod holes;
pub mod inject;
pub mod rebuilder;
pub mod scanner;

pub use holes::{merge_holes, Hole, MISSING_BYTES};
pub use inject::{inject, CorruptionMode, Xorshift32};
pub use rebuilder::{rebuild, Provenance, RebuildActions, RebuildReport, RebuildResult, Rebuilt};
pub use scanner::{scan, scan_file, Checks, HeaderReport, ScanReport};

/// Diagnostic code carried in a [`ScanReport`].  These are report data, not
/// Rust errors: scanning malformed input is never itself a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E1001")]
    MagicMismatch,
    #[serde(rename = "E1002")]
    Bounds,
    #[serde(rename = "E1003")]
    IndexChecksum,
    #[serde(rename = "E1004")]
    StrongHash,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MagicMismatch => "E1001",
            ErrorCode::Bounds        => "E1002",
            ErrorCode::IndexChecksum => "E1003",
            ErrorCode::StrongHash    => "E1004",
        }
    }

    /// Only a magic mismatch blocks a rebuild.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorCode::MagicMismatch)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub code:    ErrorCode,
    pub message: String,
}

impl ScanError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}
