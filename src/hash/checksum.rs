use std::hash::Hasher as StdHasher;

use twox_hash::XxHash64;

/// Streaming XXH64 (seed 0) with an api shaped like the strong hasher.
///
/// Only ever applied to the index table; the archive-wide digest is the
/// strong hash.
pub struct Checksum(XxHash64);

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum {
    pub fn new() -> Checksum {
        Checksum(XxHash64::with_seed(0))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.write(data);
    }

    pub fn finalize(&self) -> u64 {
        self.0.finish()
    }

    /// Little-endian byte form, as stored in the footer.
    pub fn finalize_bytes(&self) -> [u8; 8] {
        self.finalize().to_le_bytes()
    }
}

/// One-shot fast checksum, little-endian bytes.
pub fn checksum(data: &[u8]) -> [u8; 8] {
    let mut c = Checksum::new();
    c.update(data);
    c.finalize_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(checksum(b""),    0xEF46_DB37_51D8_E999u64.to_le_bytes());
        assert_eq!(checksum(b"a"),   0xD24E_C4F1_A98C_6E5Bu64.to_le_bytes());
        assert_eq!(checksum(b"abc"), 0x44BC_2CF5_AD77_0999u64.to_le_bytes());
    }

    #[test]
    fn split_updates() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut c = Checksum::new();
        for piece in data.chunks(33) {
            c.update(piece);
        }
        assert_eq!(c.finalize_bytes(), checksum(&data));
    }
}
