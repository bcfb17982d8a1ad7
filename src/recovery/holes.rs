use serde::{Deserialize, Serialize};

/// Reason attached to data bytes the header declares but the buffer lacks.
pub const MISSING_BYTES: &str = "missing_bytes";

/// Half-open byte range `[start, end)` that integrity checks cannot vouch for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hole {
    pub start:  u64,
    pub end:    u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Hole {
    pub fn new(start: u64, end: u64, reason: Option<&str>) -> Self {
        Self { start, end, reason: reason.map(str::to_owned) }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Minimal sorted, non-overlapping cover of `holes`.
///
/// Empty or inverted ranges are dropped.  Touching ranges (`next.start ==
/// cur.end`) merge.  A merged range keeps its reason only while every
/// contributor agrees on it.
pub fn merge_holes<I>(holes: I) -> Vec<Hole>
where
    I: IntoIterator<Item = Hole>,
{
    let mut sorted: Vec<Hole> = holes.into_iter().filter(|h| !h.is_empty()).collect();
    sorted.sort_by_key(|h| (h.start, h.end));

    let mut merged: Vec<Hole> = Vec::with_capacity(sorted.len());
    for hole in sorted {
        match merged.last_mut() {
            Some(cur) if hole.start <= cur.end => {
                cur.end = cur.end.max(hole.end);
                if cur.reason != hole.reason {
                    cur.reason = None;
                }
            }
            _ => merged.push(hole),
        }
    }
    merged
}
