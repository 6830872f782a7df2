//! End-to-end scenarios exercising the store's public surface together,
//! rather than one component at a time.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use tempfile::TempDir;
use vrift_cas::{Cas, Source};

fn open() -> (TempDir, Cas) {
    let dir = TempDir::new().unwrap();
    let cas = Cas::open(dir.path()).unwrap();
    (dir, cas)
}

#[test]
fn empty_directory_round_trip() {
    let (src, cas) = open();
    let empty = src.path().join("empty");
    fs::create_dir(&empty).unwrap();

    let digest = cas.commit_directory(&empty).unwrap();

    let dest = src.path().join("checked_out");
    cas.checkout(&dest, &digest).unwrap();
    assert!(fs::read_dir(&dest).unwrap().next().is_none());

    let objects = cas.list_objects().unwrap();
    assert_eq!(objects.len(), 1);
}

#[test]
fn single_file_insert_matches_spec_digest() {
    // dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f is the
    // SHA-256 of the 13 bytes "Hello, World!" (capital W).
    let (src, cas) = open();
    let tree = src.path().join("tree");
    fs::create_dir(&tree).unwrap();
    fs::write(tree.join("hello.txt"), b"Hello, World!").unwrap();

    let root = cas.commit_directory(&tree).unwrap();

    let expected = vrift_cas::Digest::from_hex(
        "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
        13,
    )
    .unwrap();
    assert!(cas.check_blob(&expected).is_some());
    assert_eq!(fs::read(cas.objpath(&expected)).unwrap(), b"Hello, World!");

    let dest = src.path().join("out");
    cas.checkout(&dest, &root).unwrap();
    assert_eq!(fs::read(dest.join("hello.txt")).unwrap(), b"Hello, World!");
}

#[test]
fn executable_bit_preserved_for_user_exec_only() {
    let (src, cas) = open();
    let tree = src.path().join("tree");
    fs::create_dir(&tree).unwrap();
    fs::write(tree.join("run.sh"), b"#!/bin/sh\necho hi\n").unwrap();
    fs::set_permissions(tree.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();

    let root = cas.commit_directory(&tree).unwrap();
    let dest = src.path().join("out");
    cas.checkout(&dest, &root).unwrap();

    let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn diff_of_disjoint_trees() {
    let (src, cas) = open();
    let tree_a = src.path().join("a");
    fs::create_dir(&tree_a).unwrap();
    fs::write(tree_a.join("a.txt"), b"a").unwrap();
    fs::write(tree_a.join("b.txt"), b"old").unwrap();

    let tree_b = src.path().join("b");
    fs::create_dir(&tree_b).unwrap();
    fs::write(tree_b.join("b.txt"), b"new").unwrap();
    fs::write(tree_b.join("c.txt"), b"c").unwrap();

    let da = cas.commit_directory(&tree_a).unwrap();
    let db = cas.commit_directory(&tree_b).unwrap();

    let diff = cas.diff_trees(Some(&da), Some(&db)).unwrap();
    assert_eq!(diff.modified, vec!["b.txt".to_string()]);
    assert_eq!(diff.removed, vec!["a.txt".to_string()]);
    assert_eq!(diff.added, vec!["c.txt".to_string()]);
}

#[test]
fn prune_preserves_reachable_removes_orphaned() {
    let (src, cas) = open();
    let orphan = cas.add_object(Source::Buffer(b"X")).unwrap();

    let tree = src.path().join("tree");
    fs::create_dir(&tree).unwrap();
    fs::write(tree.join("Y"), b"Y-content").unwrap();
    let root = cas.commit_directory(&tree).unwrap();
    cas.set_ref("r", &root).unwrap();

    let freed = cas.prune().unwrap();
    assert_eq!(freed, orphan.size_bytes);
    assert!(cas.check_blob(&orphan).is_none());

    assert!(cas.resolve_ref("r", false).is_ok());
    let dest = src.path().join("out");
    cas.checkout(&dest, &root).unwrap();
    assert!(dest.join("Y").exists());
}

#[test]
fn lru_ordering_across_refs() {
    let (_src, cas) = open();
    let d = vrift_cas::Digest::new([9u8; 32], 1);
    cas.set_ref("a", &d).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(15));
    cas.set_ref("b", &d).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(15));
    cas.set_ref("c", &d).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(15));

    cas.resolve_ref("a", true).unwrap();

    assert_eq!(cas.list_refs().unwrap(), vec!["b", "c", "a"]);
}

#[test]
fn add_object_idempotent_across_many_calls() {
    let (_src, cas) = open();
    let mut last = None;
    for _ in 0..5 {
        let d = cas.add_object(Source::Buffer(b"repeat me")).unwrap();
        if let Some(prev) = last {
            assert_eq!(prev, d);
        }
        last = Some(d);
    }
    let digest = last.unwrap();
    let siblings = fs::read_dir(cas.objpath(&digest).parent().unwrap()).unwrap();
    assert_eq!(siblings.count(), 1);
}

#[test]
fn object_filenames_match_content_hash() {
    let (_src, cas) = open();
    let digest = cas.add_object(Source::Buffer(b"naming invariant")).unwrap();

    let path = cas.objpath(&digest);
    let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
    let tail = path.file_name().unwrap().to_str().unwrap();
    assert_eq!(format!("{shard}{tail}"), digest.hash_hex());
}

#[test]
fn diff_is_symmetric_under_swap() {
    let (src, cas) = open();
    let tree_a = src.path().join("a");
    fs::create_dir(&tree_a).unwrap();
    fs::write(tree_a.join("a.txt"), b"a").unwrap();
    fs::write(tree_a.join("shared.txt"), b"old").unwrap();

    let tree_b = src.path().join("b");
    fs::create_dir(&tree_b).unwrap();
    fs::write(tree_b.join("shared.txt"), b"new").unwrap();
    fs::write(tree_b.join("c.txt"), b"c").unwrap();

    let da = cas.commit_directory(&tree_a).unwrap();
    let db = cas.commit_directory(&tree_b).unwrap();

    let forward = cas.diff_trees(Some(&da), Some(&db)).unwrap();
    let backward = cas.diff_trees(Some(&db), Some(&da)).unwrap();

    assert_eq!(forward.added, backward.removed);
    assert_eq!(forward.removed, backward.added);

    let mut fwd_modified = forward.modified.clone();
    let mut bwd_modified = backward.modified.clone();
    fwd_modified.sort();
    bwd_modified.sort();
    assert_eq!(fwd_modified, bwd_modified);
}

#[test]
fn commit_then_checkout_then_commit_round_trips_digest() {
    let (src, cas) = open();
    let tree = src.path().join("tree");
    fs::create_dir_all(tree.join("nested")).unwrap();
    fs::write(tree.join("top.txt"), b"top").unwrap();
    fs::write(tree.join("nested/inner.txt"), b"inner").unwrap();
    std::os::unix::fs::symlink("top.txt", tree.join("alias")).unwrap();

    let digest = cas.commit_directory(&tree).unwrap();
    let dest = src.path().join("roundtrip");
    cas.checkout(&dest, &digest).unwrap();
    let digest2 = cas.commit_directory(&dest).unwrap();

    assert_eq!(digest, digest2);
}
