//! Directory tree walker and Merkle tree hash.
//!
//! Every entry below the root (the root itself is not an entry) becomes a
//! leaf whose hash is the strong hash of its descriptor:
//!
//! ```text
//! type:path:contentHash:linkTarget:size:mtime
//! ```
//!
//! Empty fields stay empty (`file:a.txt:<hex>::5:1700000000000`).  Entries
//! are sorted by relative path (`/`-separated) before hashing; adjacent leaf
//! hashes are then combined with `strong_hash(left || right)` level by level,
//! an unpaired last hash carrying forward unchanged.  An empty tree hashes
//! as `strong_hash(b"")`.
//!
//! Because mtime is part of the descriptor, touching a file changes the tree
//! hash even though its content hash is unchanged.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use glob::Pattern;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::hash::{strong_hash, to_hex, Digest};
use crate::perf::hash_files;

pub mod diff;

pub use diff::{diff_trees, text_report, ChangeType, DiffSummary, DirectoryDiff, FileChange};

/// Link target recorded for a followed symlink that leads back into the walk.
pub const CIRCULAR: &str = "[CIRCULAR]";
/// Link target recorded for a followed symlink whose target does not exist.
pub const BROKEN:   &str = "[BROKEN]";

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Block,
    Char,
    Fifo,
    Socket,
    Other,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::File      => "file",
            EntryType::Directory => "directory",
            EntryType::Symlink   => "symlink",
            EntryType::Block     => "block",
            EntryType::Char      => "char",
            EntryType::Fifo      => "fifo",
            EntryType::Socket    => "socket",
            EntryType::Other     => "other",
        }
    }

    fn of(ft: fs::FileType) -> Self {
        if ft.is_symlink() {
            return EntryType::Symlink;
        }
        if ft.is_dir() {
            return EntryType::Directory;
        }
        if ft.is_file() {
            return EntryType::File;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_block_device() { return EntryType::Block; }
            if ft.is_char_device()  { return EntryType::Char; }
            if ft.is_fifo()         { return EntryType::Fifo; }
            if ft.is_socket()       { return EntryType::Socket; }
        }
        EntryType::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    #[serde(rename = "type")]
    pub kind:   EntryType,
    /// Relative to the walk root, `/`-separated.
    pub path:   String,
    pub size:   u64,
    /// Milliseconds since the Unix epoch.
    pub mtime:  u64,
    pub mode:   u32,
    /// Hex strong hash of the content (regular files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash:   Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl DirectoryEntry {
    /// Canonical leaf descriptor.
    pub fn descriptor(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.kind.as_str(),
            self.path,
            self.hash.as_deref().unwrap_or(""),
            self.target.as_deref().unwrap_or(""),
            self.size,
            self.mtime,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryTree {
    /// Final component of the walked path.
    pub root:        String,
    pub entries:     Vec<DirectoryEntry>,
    pub total_files: u64,
    pub total_dirs:  u64,
    pub total_size:  u64,
    pub tree_hash:   String,
}

/// Merkle root over `entries` in the given order.
pub fn tree_hash(entries: &[DirectoryEntry]) -> Digest {
    let mut level: Vec<Digest> = entries
        .iter()
        .map(|e| strong_hash(e.descriptor().as_bytes()))
        .collect();
    if level.is_empty() {
        return strong_hash(b"");
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [l, r] => {
                    let mut buf = [0u8; 64];
                    buf[..32].copy_from_slice(l);
                    buf[32..].copy_from_slice(r);
                    strong_hash(&buf)
                }
                [odd] => *odd,
                _     => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

// ── WalkOptions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub recursive:       bool,
    pub follow_symlinks: bool,
    /// Glob patterns matched against every path component.
    pub ignore_patterns: Vec<String>,
    /// Depth 1 is the root's direct children.  `None` is unlimited.
    pub max_depth:       Option<usize>,
    pub compute_hashes:  bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive:       true,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            max_depth:       None,
            compute_hashes:  true,
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

#[cfg(unix)]
type FileId = (u64, u64);
#[cfg(not(unix))]
type FileId = PathBuf;

#[cfg(unix)]
fn file_id(_path: &Path, meta: &Metadata) -> io::Result<FileId> {
    use std::os::unix::fs::MetadataExt;
    Ok((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(path: &Path, _meta: &Metadata) -> io::Result<FileId> {
    fs::canonicalize(path)
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

fn mtime_ms(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn join_rel(prefix: &str, rel: &Path) -> String {
    let tail = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    match (prefix.is_empty(), tail.is_empty()) {
        (true, _)     => tail,
        (false, true) => prefix.to_owned(),
        (false, false) => format!("{prefix}/{tail}"),
    }
}

// ── DirectoryWalker ───────────────────────────────────────────────────────────

pub struct DirectoryWalker {
    options: WalkOptions,
    ignore:  Vec<Pattern>,
}

/// Mutable state of one walk.
struct Walk {
    entries: Vec<DirectoryEntry>,
    /// `(entry index, absolute path)` of files still to hash.
    pending: Vec<(usize, PathBuf)>,
    visited: HashSet<FileId>,
}

impl DirectoryWalker {
    pub fn new(options: WalkOptions) -> Result<Self, WalkError> {
        let ignore = options
            .ignore_patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { options, ignore })
    }

    pub fn options(&self) -> &WalkOptions {
        &self.options
    }

    fn ignored(&self, name: &std::ffi::OsStr) -> bool {
        let name = name.to_string_lossy();
        self.ignore.iter().any(|p| p.matches(&name))
    }

    /// Effective depth limit below a directory found at `depth`.
    fn budget(&self, depth: usize) -> Option<usize> {
        let limit = if self.options.recursive { self.options.max_depth } else { Some(1) };
        limit.map(|l| l.saturating_sub(depth))
    }

    pub fn walk(&self, root: &Path) -> Result<DirectoryTree, WalkError> {
        let meta = fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(WalkError::NotADirectory(root.to_path_buf()));
        }

        let mut walk = Walk { entries: Vec::new(), pending: Vec::new(), visited: HashSet::new() };
        walk.visited.insert(file_id(root, &meta)?);
        self.walk_dir(root, "", 0, &mut walk);

        if self.options.compute_hashes {
            let paths: Vec<PathBuf> = walk.pending.iter().map(|(_, p)| p.clone()).collect();
            for ((idx, path), digest) in walk.pending.iter().zip(hash_files(&paths)) {
                match digest {
                    Ok(d)  => walk.entries[*idx].hash = Some(to_hex(&d)),
                    Err(e) => warn!("cannot hash {}: {e}", path.display()),
                }
            }
        }

        let mut entries = walk.entries;
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let total_files = entries.iter().filter(|e| e.kind == EntryType::File).count() as u64;
        let total_dirs  = entries.iter().filter(|e| e.kind == EntryType::Directory).count() as u64;
        let total_size  = entries.iter().filter(|e| e.kind == EntryType::File).map(|e| e.size).sum();
        let tree_hash   = to_hex(&tree_hash(&entries));
        debug!("walked {}: {} entries, tree {}", root.display(), entries.len(), tree_hash);

        Ok(DirectoryTree {
            root: root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string()),
            entries,
            total_files,
            total_dirs,
            total_size,
            tree_hash,
        })
    }

    /// Walk the directory at `dir`, whose entries are reported under
    /// `prefix` and sit at `depth + 1`.
    fn walk_dir(&self, dir: &Path, prefix: &str, depth: usize, walk: &mut Walk) {
        let budget = self.budget(depth);
        if budget == Some(0) {
            return;
        }

        let mut wd = WalkDir::new(dir).min_depth(1).follow_links(false).sort_by_file_name();
        if let Some(b) = budget {
            wd = wd.max_depth(b);
        }

        for item in wd.into_iter().filter_entry(|e| !self.ignored(e.file_name())) {
            let entry = match item {
                Ok(e)  => e,
                Err(e) => {
                    warn!("cannot read entry under {}: {e}", dir.display());
                    continue;
                }
            };
            let path = entry.path();
            let rel  = join_rel(prefix, path.strip_prefix(dir).unwrap_or(path));
            let meta = match entry.metadata() {
                Ok(m)  => m,
                Err(e) => {
                    warn!("cannot stat {}: {e}", path.display());
                    continue;
                }
            };

            let kind = EntryType::of(entry.file_type());
            let mut record = DirectoryEntry {
                kind,
                path:   rel,
                size:   0,
                mtime:  mtime_ms(&meta),
                mode:   mode_of(&meta),
                hash:   None,
                target: None,
            };

            match kind {
                EntryType::Symlink => {
                    let link = fs::read_link(path)
                        .map(|t| t.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if self.options.follow_symlinks {
                        self.follow(path, record, link, depth + entry.depth(), walk);
                        continue;
                    }
                    record.target = Some(link);
                }
                EntryType::Directory => {
                    if let Ok(id) = file_id(path, &meta) {
                        walk.visited.insert(id);
                    }
                }
                EntryType::File => {
                    record.size = meta.len();
                    walk.pending.push((walk.entries.len(), path.to_path_buf()));
                }
                _ => {}
            }
            walk.entries.push(record);
        }
    }

    /// Resolve a symlink found at `depth`.  `record` holds its lstat view.
    fn follow(&self, path: &Path, mut record: DirectoryEntry, link: String, depth: usize, walk: &mut Walk) {
        let resolved = match fs::metadata(path) {
            Ok(m)  => m,
            Err(e) => {
                warn!("broken symlink {} -> {link}: {e}", path.display());
                record.target = Some(BROKEN.to_owned());
                walk.entries.push(record);
                return;
            }
        };

        if resolved.is_dir() {
            let id = match file_id(path, &resolved) {
                Ok(id) => id,
                Err(e) => {
                    warn!("cannot identify {}: {e}", path.display());
                    record.target = Some(BROKEN.to_owned());
                    walk.entries.push(record);
                    return;
                }
            };
            if !walk.visited.insert(id) {
                warn!("circular symlink {} -> {link}", path.display());
                record.target = Some(CIRCULAR.to_owned());
                walk.entries.push(record);
                return;
            }
            let prefix = record.path.clone();
            record.kind   = EntryType::Directory;
            record.mtime  = mtime_ms(&resolved);
            record.mode   = mode_of(&resolved);
            record.target = Some(link);
            walk.entries.push(record);
            self.walk_dir(path, &prefix, depth, walk);
            return;
        }

        record.kind   = EntryType::of(resolved.file_type());
        record.mtime  = mtime_ms(&resolved);
        record.mode   = mode_of(&resolved);
        record.target = Some(link);
        if record.kind == EntryType::File {
            record.size = resolved.len();
            walk.pending.push((walk.entries.len(), path.to_path_buf()));
        }
        walk.entries.push(record);
    }
}

/// Walk `root` with `options`.
pub fn walk(root: &Path, options: WalkOptions) -> Result<DirectoryTree, WalkError> {
    DirectoryWalker::new(options)?.walk(root)
}
