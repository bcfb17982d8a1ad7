//! Bulk hashing helpers.
//!
//! # Parallel hashing
//!
//! [`hash_files`] and [`hash_chunks`] hash independent inputs concurrently
//! with Rayon when the `parallel` feature is enabled, and sequentially
//! otherwise.  Output order always matches input order, so results are
//! identical either way.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::hash::{strong_hash, Digest, Hasher};

/// Strong hash of everything `reader` yields, streamed through the hasher.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

pub fn hash_file(path: &Path) -> io::Result<Digest> {
    hash_reader(File::open(path)?)
}

/// Hash every file in `paths`; one result per path, in order.
pub fn hash_files(paths: &[PathBuf]) -> Vec<io::Result<Digest>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        paths.par_iter().map(|p| hash_file(p)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        paths.iter().map(|p| hash_file(p)).collect()
    }
}

/// Hash in-memory chunks; one digest per chunk, in order.
pub fn hash_chunks(chunks: &[&[u8]]) -> Vec<Digest> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        chunks.par_iter().map(|c| strong_hash(c)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        chunks.iter().map(|c| strong_hash(c)).collect()
    }
}
