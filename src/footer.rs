use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::hash::{fast_checksum, strong_hash, Digest};

pub const FOOTER_SIZE: usize = 48;

/// Trailing integrity envelope: strong hash of every byte before the footer,
/// fast checksum of the index table, 8 reserved bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub strong_hash:    Digest,
    pub index_checksum: [u8; 8],
    pub reserved:       u64,
}

impl Footer {
    /// Compute the footer for a pre-footer region whose index table is
    /// `index`.
    pub fn compute(pre_footer: &[u8], index: &[u8]) -> Self {
        Self {
            strong_hash:    strong_hash(pre_footer),
            index_checksum: fast_checksum(index),
            reserved:       0,
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.strong_hash)?;
        writer.write_all(&self.index_checksum)?;
        writer.write_u64::<LittleEndian>(self.reserved)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[..32].copy_from_slice(&self.strong_hash);
        out[32..40].copy_from_slice(&self.index_checksum);
        out[40..].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    /// Parse the last 48 bytes of `buf`; `None` if shorter.
    pub fn from_tail(buf: &[u8]) -> Option<Self> {
        let start = buf.len().checked_sub(FOOTER_SIZE)?;
        let tail = &buf[start..];
        let mut strong_hash    = [0u8; 32];
        let mut index_checksum = [0u8; 8];
        let mut reserved       = [0u8; 8];
        strong_hash.copy_from_slice(&tail[..32]);
        index_checksum.copy_from_slice(&tail[32..40]);
        reserved.copy_from_slice(&tail[40..]);
        Some(Self { strong_hash, index_checksum, reserved: u64::from_le_bytes(reserved) })
    }
}
