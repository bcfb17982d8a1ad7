//! Deterministic corruption injector for recovery drills.
//!
//! Every mode except [`CorruptionMode::MagicFlip`] leaves the first four
//! bytes alone, so the result stays within reach of [`super::rebuild`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::footer::FOOTER_SIZE;
use crate::header::{read_field, HEADER_SIZE, OFF_INDEX_LENGTH, OFF_INDEX_OFFSET};
use crate::index::ENTRY_SIZE;

const ZERO_PAGE: usize = 4096;

/// xorshift32 PRNG.  A zero seed stays at zero forever.
#[derive(Debug, Clone)]
pub struct Xorshift32(u32);

impl Xorshift32 {
    pub fn new(seed: u32) -> Self {
        Self(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// Uniform-ish value in `0..max`; zero when `max` is zero.
    pub fn below(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        (self.next_u32() as u64 % max as u64) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorruptionMode {
    BitFlip,
    Truncate,
    Swap,
    MagicFlip,
    VersionFlip,
    IndexFlip,
    IndexTruncate,
    FooterFlip,
    ZeroPage,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown corruption mode: {0}")]
pub struct UnknownMode(pub String);

impl CorruptionMode {
    pub const ALL: [CorruptionMode; 9] = [
        CorruptionMode::BitFlip,
        CorruptionMode::Truncate,
        CorruptionMode::Swap,
        CorruptionMode::MagicFlip,
        CorruptionMode::VersionFlip,
        CorruptionMode::IndexFlip,
        CorruptionMode::IndexTruncate,
        CorruptionMode::FooterFlip,
        CorruptionMode::ZeroPage,
    ];

    /// Modes the rebuilder is expected to survive, in regression-suite order.
    pub const RECOVERABLE: [CorruptionMode; 8] = [
        CorruptionMode::BitFlip,
        CorruptionMode::Truncate,
        CorruptionMode::Swap,
        CorruptionMode::VersionFlip,
        CorruptionMode::IndexFlip,
        CorruptionMode::IndexTruncate,
        CorruptionMode::FooterFlip,
        CorruptionMode::ZeroPage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CorruptionMode::BitFlip       => "bitflip",
            CorruptionMode::Truncate      => "trunc",
            CorruptionMode::Swap          => "swap",
            CorruptionMode::MagicFlip     => "magicflip",
            CorruptionMode::VersionFlip   => "versionflip",
            CorruptionMode::IndexFlip     => "indexflip",
            CorruptionMode::IndexTruncate => "indextrunc",
            CorruptionMode::FooterFlip    => "footerflip",
            CorruptionMode::ZeroPage      => "zeropage",
        }
    }
}

impl fmt::Display for CorruptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CorruptionMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| UnknownMode(s.to_owned()))
    }
}

/// Copy of `buf` damaged according to `mode`, reproducible from `seed`.
/// Inputs too small for a mode come back unchanged.
pub fn inject(buf: &[u8], mode: CorruptionMode, seed: u32) -> Vec<u8> {
    let mut rng = Xorshift32::new(seed);
    let mut out = buf.to_vec();
    let len = out.len();

    match mode {
        CorruptionMode::BitFlip => {
            if len > 4 {
                let off = 4 + rng.below(len - 4);
                let bit = 1u8 << rng.below(8);
                out[off] ^= bit;
            }
        }
        CorruptionMode::Truncate => {
            if len > HEADER_SIZE {
                let min_len = len.min(HEADER_SIZE + 1);
                out.truncate(min_len + rng.below(len - min_len));
            }
        }
        CorruptionMode::Swap => {
            if len > 4 {
                let range     = (len / 8).clamp(1, 64);
                let body_end  = HEADER_SIZE.max(len.saturating_sub(FOOTER_SIZE));
                let safe_span = (body_end - HEADER_SIZE).saturating_sub(range);
                let mut pick  = || {
                    if safe_span > 0 {
                        HEADER_SIZE + rng.below(safe_span)
                    } else {
                        4 + rng.below(len.saturating_sub(range + 4).max(1))
                    }
                };
                let a = pick().min(len);
                let b = pick().min(len);
                swap_ranges(&mut out, a, b, range);
            }
        }
        CorruptionMode::MagicFlip => {
            let n = len.min(4);
            out[..n].copy_from_slice(&b"BAD!"[..n]);
        }
        CorruptionMode::VersionFlip => {
            if len >= 6 {
                out[5] ^= 0x01;
            }
        }
        CorruptionMode::IndexFlip => {
            let idx_off = read_field(&out, OFF_INDEX_OFFSET).unwrap_or(HEADER_SIZE as u64);
            let idx_len = read_field(&out, OFF_INDEX_LENGTH).unwrap_or(ENTRY_SIZE as u64);
            let start = (idx_off.min(len as u64) as usize).max(4);
            let end   = (idx_off.saturating_add(idx_len).min(len as u64) as usize).max(start);
            if end > start {
                let off = start + rng.below(end - start);
                out[off] ^= 0xFF;
            }
        }
        CorruptionMode::IndexTruncate => {
            if len >= OFF_INDEX_LENGTH + 8 {
                let idx_len = read_field(&out, OFF_INDEX_LENGTH).unwrap_or(ENTRY_SIZE as u64);
                let next    = idx_len.saturating_sub(ENTRY_SIZE as u64);
                out[OFF_INDEX_LENGTH..OFF_INDEX_LENGTH + 8].copy_from_slice(&next.to_le_bytes());
            }
        }
        CorruptionMode::FooterFlip => {
            if len >= FOOTER_SIZE.max(5) {
                let off = (len - FOOTER_SIZE + rng.below(FOOTER_SIZE)).max(4);
                out[off] ^= 0xFF;
            }
        }
        CorruptionMode::ZeroPage => {
            if len > 4 {
                let start = (len - 1).min(HEADER_SIZE.max(rng.below(len))).max(4);
                let end   = len.min(start + ZERO_PAGE);
                out[start..end].fill(0);
            }
        }
    }
    out
}

/// Exchange `out[a..a+range]` and `out[b..b+range]`, clipping both to the
/// buffer.  Overlapping ranges resolve as a copy from `b` followed by the
/// saved `a` bytes written at `b`.
fn swap_ranges(out: &mut [u8], a: usize, b: usize, range: usize) {
    let len   = out.len();
    let saved = out[a..(a + range).min(len)].to_vec();
    let src   = out[b..(b + range).min(len)].to_vec();
    let n = src.len().min(len - a);
    out[a..a + n].copy_from_slice(&src[..n]);
    let n = saved.len().min(len - b);
    out[b..b + n].copy_from_slice(&saved[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::minimal_archive;

    #[test]
    fn xorshift_sequence() {
        let mut r = Xorshift32::new(1);
        assert_eq!(r.next_u32(), 270_369);
        assert_eq!(r.next_u32(), 67_634_689);
        assert_eq!(Xorshift32::new(0).below(10), 0);
        assert_eq!(Xorshift32::new(7).below(0), 0);
    }

    #[test]
    fn mode_names_round_trip() {
        for m in CorruptionMode::ALL {
            assert_eq!(m.name().parse::<CorruptionMode>(), Ok(m));
        }
        assert!("shred".parse::<CorruptionMode>().is_err());
    }

    #[test]
    fn magic_survives_every_recoverable_mode() {
        let base = minimal_archive();
        for seed in 0..50 {
            for m in CorruptionMode::RECOVERABLE {
                let bad = inject(&base, m, seed);
                assert_eq!(&bad[..4], b"HAJI", "{m} seed {seed}");
            }
        }
    }

    #[test]
    fn same_seed_same_damage() {
        let base = minimal_archive();
        for m in CorruptionMode::ALL {
            assert_eq!(inject(&base, m, 1234), inject(&base, m, 1234));
        }
    }

    #[test]
    fn specific_modes() {
        let base = minimal_archive();

        let v = inject(&base, CorruptionMode::VersionFlip, 1);
        assert_eq!(v[5], base[5] ^ 1);

        let t = inject(&base, CorruptionMode::IndexTruncate, 1);
        assert_eq!(read_field(&t, OFF_INDEX_LENGTH), Some(0));

        let t = inject(&base, CorruptionMode::Truncate, 99);
        assert!(t.len() > HEADER_SIZE && t.len() < base.len());

        let m = inject(&base, CorruptionMode::MagicFlip, 1);
        assert_eq!(&m[..4], b"BAD!");

        let f = inject(&base, CorruptionMode::FooterFlip, 5);
        let diff: Vec<usize> = (0..base.len()).filter(|&i| f[i] != base[i]).collect();
        assert_eq!(diff.len(), 1);
        assert!(diff[0] >= base.len() - FOOTER_SIZE);
    }

    #[test]
    fn swap_clips_at_buffer_end() {
        let mut buf: Vec<u8> = (0..10).collect();
        swap_ranges(&mut buf, 2, 8, 4);
        assert_eq!(buf, vec![0, 1, 8, 9, 4, 5, 6, 7, 2, 3]);
    }
}
