use filetime::{set_file_mtime, FileTime};
use hdiff::hash::{strong_hash, to_hex};
use hdiff::tree::{
    diff_trees, text_report, walk, ChangeType, DirectoryWalker, EntryType, WalkError, WalkOptions,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn sample() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("a.txt"), b"hello").unwrap();
    fs::create_dir_all(root.join("sub/deep")).unwrap();
    fs::write(root.join("sub/b.bin"), [1u8, 2, 3]).unwrap();
    fs::write(root.join("sub/deep/c.txt"), b"c").unwrap();
    fs::create_dir(root.join("node_modules")).unwrap();
    fs::write(root.join("node_modules/x.js"), b"x").unwrap();
    dir
}

fn paths(root: &Path, options: WalkOptions) -> Vec<String> {
    walk(root, options).unwrap().entries.into_iter().map(|e| e.path).collect()
}

#[test]
fn test_tree_hash_is_stable() {
    let dir = sample();
    let t1 = walk(dir.path(), WalkOptions::default()).unwrap();
    let t2 = walk(dir.path(), WalkOptions::default()).unwrap();
    assert_eq!(t1.tree_hash, t2.tree_hash);
    assert_eq!(t1.total_files, 4);
    assert_eq!(t1.total_dirs, 3);
    assert_eq!(t1.total_size, 5 + 3 + 1 + 1);
    assert_eq!(t1.tree_hash.len(), 64);
}

#[test]
fn test_entries_sorted_with_relative_paths() {
    let dir = sample();
    assert_eq!(paths(dir.path(), WalkOptions::default()), vec![
        "a.txt",
        "node_modules",
        "node_modules/x.js",
        "sub",
        "sub/b.bin",
        "sub/deep",
        "sub/deep/c.txt",
    ]);
}

#[test]
fn test_entry_fields() {
    let dir = sample();
    let tree = walk(dir.path(), WalkOptions::default()).unwrap();
    let a = tree.entries.iter().find(|e| e.path == "a.txt").unwrap();
    assert_eq!(a.kind, EntryType::File);
    assert_eq!(a.size, 5);
    assert_eq!(a.hash.as_deref(), Some(to_hex(&strong_hash(b"hello")).as_str()));
    assert!(a.target.is_none());
    assert!(a.mtime > 0);
    assert_eq!(
        a.descriptor(),
        format!("file:a.txt:{}::5:{}", to_hex(&strong_hash(b"hello")), a.mtime)
    );

    let sub = tree.entries.iter().find(|e| e.path == "sub").unwrap();
    assert_eq!(sub.kind, EntryType::Directory);
    assert_eq!(sub.size, 0);
    assert!(sub.hash.is_none());

    let v = serde_json::to_value(&tree).unwrap();
    assert!(v["treeHash"].is_string());
    assert_eq!(v["totalFiles"], 4);
    assert_eq!(v["entries"][0]["type"], "file");
}

#[test]
fn test_rename_changes_root_hash() {
    let dir = sample();
    let before = walk(dir.path(), WalkOptions::default()).unwrap();
    fs::rename(dir.path().join("a.txt"), dir.path().join("z.txt")).unwrap();
    let after = walk(dir.path(), WalkOptions::default()).unwrap();
    assert_ne!(before.tree_hash, after.tree_hash);
}

#[test]
fn test_touch_keeps_content_hash_but_changes_root() {
    let dir = sample();
    let file = dir.path().join("a.txt");
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    let before = walk(dir.path(), WalkOptions::default()).unwrap();

    set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let after = walk(dir.path(), WalkOptions::default()).unwrap();

    let find = |t: &hdiff::tree::DirectoryTree| t.entries.iter().find(|e| e.path == "a.txt").cloned().unwrap();
    assert_eq!(find(&before).hash, find(&after).hash);
    assert_eq!(find(&before).mtime, 1_600_000_000_000);
    assert_eq!(find(&after).mtime, 1_700_000_000_000);
    assert_ne!(before.tree_hash, after.tree_hash);

    // Touch is not a content change.
    let d = diff_trees(&before, &after);
    assert!(d.is_identical());
}

#[test]
fn test_ignore_patterns_and_depth() {
    let dir = sample();
    let ignore = WalkOptions { ignore_patterns: vec!["node_modules".into(), "*.bin".into()], ..Default::default() };
    assert_eq!(paths(dir.path(), ignore), vec!["a.txt", "sub", "sub/deep", "sub/deep/c.txt"]);

    let shallow = WalkOptions { max_depth: Some(1), ..Default::default() };
    assert_eq!(paths(dir.path(), shallow), vec!["a.txt", "node_modules", "sub"]);

    let flat = WalkOptions { recursive: false, ..Default::default() };
    assert_eq!(paths(dir.path(), flat), vec!["a.txt", "node_modules", "sub"]);

    let two = WalkOptions { max_depth: Some(2), ..Default::default() };
    assert!(!paths(dir.path(), two).contains(&"sub/deep/c.txt".to_owned()));
}

#[test]
fn test_without_hashes() {
    let dir = sample();
    let tree = walk(dir.path(), WalkOptions { compute_hashes: false, ..Default::default() }).unwrap();
    assert!(tree.entries.iter().all(|e| e.hash.is_none()));
}

#[test]
fn test_empty_directory() {
    let dir = TempDir::new().unwrap();
    let tree = walk(dir.path(), WalkOptions::default()).unwrap();
    assert!(tree.entries.is_empty());
    assert_eq!(tree.tree_hash, to_hex(&strong_hash(b"")));
}

#[test]
fn test_walk_rejects_file_root() {
    let dir = sample();
    let err = walk(&dir.path().join("a.txt"), WalkOptions::default()).unwrap_err();
    assert!(matches!(err, WalkError::NotADirectory(_)));
}

#[cfg(unix)]
#[test]
fn test_symlinks() {
    use std::os::unix::fs::symlink;

    let dir = sample();
    let root = dir.path();
    symlink("sub", root.join("z_loop")).unwrap();
    symlink(".", root.join("sub/deep/up")).unwrap();
    symlink("missing.txt", root.join("dangling")).unwrap();
    symlink("a.txt", root.join("alias.txt")).unwrap();

    // Not followed: links are leaves carrying their target text.
    let plain = walk(root, WalkOptions::default()).unwrap();
    let dangling = plain.entries.iter().find(|e| e.path == "dangling").unwrap();
    assert_eq!(dangling.kind, EntryType::Symlink);
    assert_eq!(dangling.target.as_deref(), Some("missing.txt"));
    assert!(!plain.entries.iter().any(|e| e.path.starts_with("z_loop/")));

    let tree = walk(root, WalkOptions { follow_symlinks: true, ..Default::default() }).unwrap();
    let get = |p: &str| tree.entries.iter().find(|e| e.path == p).unwrap_or_else(|| panic!("{p} missing"));

    assert_eq!(get("dangling").target.as_deref(), Some("[BROKEN]"));

    let alias = get("alias.txt");
    assert_eq!(alias.kind, EntryType::File);
    assert_eq!(alias.target.as_deref(), Some("a.txt"));
    assert_eq!(alias.hash, get("a.txt").hash);

    // `sub` was already walked directly; its alias is reported as a cycle.
    let looped = get("z_loop");
    assert_eq!(looped.kind, EntryType::Symlink);
    assert_eq!(looped.target.as_deref(), Some("[CIRCULAR]"));

    assert_eq!(get("sub/deep/up").target.as_deref(), Some("[CIRCULAR]"));
}

#[test]
fn test_directory_diff() {
    let src = sample();
    let dst = sample();
    fs::write(dst.path().join("a.txt"), b"HELLO!").unwrap();
    fs::remove_file(dst.path().join("sub/b.bin")).unwrap();
    fs::write(dst.path().join("new.txt"), b"0123456789").unwrap();

    let walker = DirectoryWalker::new(WalkOptions::default()).unwrap();
    let d = diff_trees(&walker.walk(src.path()).unwrap(), &walker.walk(dst.path()).unwrap());

    let changed: Vec<_> = d
        .changes
        .iter()
        .filter(|c| c.kind != ChangeType::Unchanged)
        .map(|c| (c.path.as_str(), c.kind))
        .collect();
    assert_eq!(changed, vec![
        ("a.txt", ChangeType::Modified),
        ("new.txt", ChangeType::Added),
        ("sub/b.bin", ChangeType::Removed),
    ]);
    assert_eq!(d.summary.added, 1);
    assert_eq!(d.summary.removed, 1);
    assert_eq!(d.summary.modified, 1);
    assert_eq!(d.summary.unchanged, 5);
    assert_eq!(d.summary.total_size, 6 + 10);

    let report = text_report(&d);
    assert!(report.contains("Modified:  1"));
    assert!(report.contains("  M a.txt"));
    assert!(report.contains("  D sub/b.bin"));
}
