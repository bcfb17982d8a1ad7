pub mod hash;
pub mod header;
pub mod index;
pub mod footer;
pub mod archive;
pub mod recovery;
pub mod io_stream;
pub mod perf;
pub mod tree;

pub use hash::{fast_checksum, strong_hash, Digest};
pub use header::{Header, HeaderFields};
pub use footer::Footer;
pub use index::IndexEntry;
pub use archive::{decode, encode, minimal_archive, Archive, ArchiveBuilder, ArchiveError};
pub use recovery::{inject, merge_holes, rebuild, scan, CorruptionMode, ErrorCode, Hole, RebuildResult, ScanReport};
pub use io_stream::{StreamOptions, StreamingDiff};
pub use tree::{diff_trees, DirectoryTree, DirectoryWalker, WalkOptions};
