//! Hash primitives shared by every other module.
//!
//! | Primitive | Width | Used for |
//! |-----------|-------|----------|
//! | [`strong_hash`] | 256 bit | archive pre-footer digest, chunk and file identity, tree hashes |
//! | [`fast_checksum`] | 64 bit | index table only |
//!
//! Both are pure functions over bytes and cannot fail.

pub mod checksum;
pub mod strong;

pub use checksum::Checksum;
pub use strong::Hasher;

/// A 32-byte strong digest.
pub type Digest = [u8; strong::OUT_LEN];

/// Strong (Merkle-tree, BLAKE3 hash mode) digest of `data`.
pub fn strong_hash(data: &[u8]) -> Digest {
    strong::hash(data)
}

/// XXH64 (seed 0) of `data` as little-endian bytes.
pub fn fast_checksum(data: &[u8]) -> [u8; 8] {
    checksum::checksum(data)
}

/// Lower-case hex of a digest.
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}
