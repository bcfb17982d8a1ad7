//! Directory diff over two walked trees.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DirectoryEntry, DirectoryTree, EntryType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl ChangeType {
    fn marker(&self) -> &'static str {
        match self {
            ChangeType::Added     => "A",
            ChangeType::Removed   => "D",
            ChangeType::Modified  => "M",
            ChangeType::Unchanged => " ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    #[serde(rename = "type")]
    pub kind:      ChangeType,
    pub path:      String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_entry: Option<DirectoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_entry: Option<DirectoryEntry>,
}

impl FileChange {
    fn size(&self) -> u64 {
        self.new_entry.as_ref().or(self.old_entry.as_ref()).map_or(0, |e| e.size)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub added:      u64,
    pub removed:    u64,
    pub modified:   u64,
    pub unchanged:  u64,
    /// Bytes of added and modified files.
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryDiff {
    pub changes: Vec<FileChange>,
    pub summary: DiffSummary,
}

impl DirectoryDiff {
    pub fn is_identical(&self) -> bool {
        self.summary.added == 0 && self.summary.removed == 0 && self.summary.modified == 0
    }
}

fn same_content(a: &DirectoryEntry, b: &DirectoryEntry) -> bool {
    a.hash == b.hash && a.target == b.target
}

/// Compare `source` against `target` by relative path.
///
/// An entry whose type changed is reported as removed then added.  Entries
/// of the same type are unchanged when content hash and link target match;
/// mtime and mode alone never make an entry modified.
pub fn diff_trees(source: &DirectoryTree, target: &DirectoryTree) -> DirectoryDiff {
    let old: BTreeMap<&str, &DirectoryEntry> =
        source.entries.iter().map(|e| (e.path.as_str(), e)).collect();
    let new: BTreeMap<&str, &DirectoryEntry> =
        target.entries.iter().map(|e| (e.path.as_str(), e)).collect();

    let change = |kind, path: &str, before: Option<&DirectoryEntry>, after: Option<&DirectoryEntry>| FileChange {
        kind,
        path:      path.to_owned(),
        old_entry: before.cloned(),
        new_entry: after.cloned(),
    };

    let mut changes = Vec::with_capacity(old.len().max(new.len()));
    for (path, before) in &old {
        match new.get(path) {
            None => changes.push(change(ChangeType::Removed, path, Some(before), None)),
            Some(after) if after.kind != before.kind => {
                changes.push(change(ChangeType::Removed, path, Some(before), None));
                changes.push(change(ChangeType::Added, path, None, Some(after)));
            }
            Some(after) => {
                let kind = if same_content(before, after) {
                    ChangeType::Unchanged
                } else {
                    ChangeType::Modified
                };
                changes.push(change(kind, path, Some(before), Some(after)));
            }
        }
    }
    for (path, after) in &new {
        if !old.contains_key(path) {
            changes.push(change(ChangeType::Added, path, None, Some(after)));
        }
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    let mut summary = DiffSummary::default();
    for c in &changes {
        match c.kind {
            ChangeType::Added     => summary.added += 1,
            ChangeType::Removed   => summary.removed += 1,
            ChangeType::Modified  => summary.modified += 1,
            ChangeType::Unchanged => summary.unchanged += 1,
        }
        let counts = matches!(c.kind, ChangeType::Added | ChangeType::Modified)
            && c.new_entry.as_ref().is_some_and(|e| e.kind == EntryType::File);
        if counts {
            summary.total_size += c.size();
        }
    }

    DirectoryDiff { changes, summary }
}

/// Human-readable report.  Unchanged entries are counted but not listed.
pub fn text_report(diff: &DirectoryDiff) -> String {
    diff.to_string()
}

impl fmt::Display for DirectoryDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "Directory Diff Report")?;
        writeln!(f, "=====================")?;
        writeln!(f, "Added:     {}", s.added)?;
        writeln!(f, "Removed:   {}", s.removed)?;
        writeln!(f, "Modified:  {}", s.modified)?;
        writeln!(f, "Unchanged: {}", s.unchanged)?;
        writeln!(f, "Total size: {} bytes", s.total_size)?;
        writeln!(f)?;

        for c in self.changes.iter().filter(|c| c.kind != ChangeType::Unchanged) {
            writeln!(f, "  {} {:<50} {:>10} bytes", c.kind.marker(), c.path, c.size())?;
        }
        Ok(())
    }
}
