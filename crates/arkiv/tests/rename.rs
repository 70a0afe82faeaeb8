mod common;

use arkiv::{Batch, ContainerSource, ErrorKind, PathMapping, RenameRequest};
use common::{sorted_paths, tar_gz_fixture, temp_dir, zip_bytes, zip_fixture};

fn listing(source: &ContainerSource) -> Vec<String> {
    let mut batch = Batch::default();
    let entries = batch.list(source).expect("list archive");
    batch.dispose().expect("dispose");
    sorted_paths(&entries)
}

fn read(source: &ContainerSource, path: &str) -> Option<Vec<u8>> {
    let mut batch = Batch::default();
    let data = batch.read_bytes(source, path).expect("read entry");
    batch.dispose().expect("dispose");
    data
}

#[test]
fn directory_rename_cascades_to_descendants() {
    let dir = temp_dir();
    let path = zip_fixture(
        dir.path(),
        "tree.zip",
        &[("a/", b""), ("a/b/", b""), ("a/b/file.txt", b"payload")],
    );
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let target = batch.resolve(&source, "a/b/").unwrap();
    let report = batch.rename(vec![RenameRequest::new(target, "c")]).unwrap();
    assert!(report.is_success(), "{report:?}");

    let mut mappings = report.outcomes()[0].as_ref().unwrap().clone();
    mappings.sort_by(|a, b| a.old_relative_path.cmp(&b.old_relative_path));
    assert_eq!(
        mappings,
        vec![
            PathMapping {
                old_relative_path: "a/b/".into(),
                new_relative_path: "a/c/".into(),
            },
            PathMapping {
                old_relative_path: "a/b/file.txt".into(),
                new_relative_path: "a/c/file.txt".into(),
            },
        ]
    );

    // Visible inside the batch before anything is written back.
    assert_eq!(sorted_paths(&batch.list(&source).unwrap()), ["a/", "a/c/", "a/c/file.txt"]);
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["a/", "a/c/", "a/c/file.txt"]);
    assert_eq!(read(&source, "a/c/file.txt").as_deref(), Some(&b"payload"[..]));
    assert_eq!(read(&source, "a/b/file.txt"), None);
}

#[test]
fn rename_onto_existing_entry_is_a_duplicate() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "dup.zip", &[("one.txt", b"1"), ("two.txt", b"2")]);
    let source = ContainerSource::from_path(&path);
    let before = std::fs::read(&path).unwrap();

    let mut batch = Batch::default();
    let one = batch.resolve(&source, "one.txt").unwrap();
    let report = batch.rename(vec![RenameRequest::new(one, "two.txt")]).unwrap();
    let err = report.outcomes()[0].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateEntry);
    batch.dispose().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before, "archive must be untouched");
    assert_eq!(read(&source, "one.txt").as_deref(), Some(&b"1"[..]));
    assert_eq!(read(&source, "two.txt").as_deref(), Some(&b"2"[..]));
}

#[test]
fn file_move_keeps_content() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "docs.zip", &[("docs/", b""), ("docs/readme.txt", b"hello")]);
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let readme = batch.resolve(&source, "docs/readme.txt").unwrap();
    let report = batch.rename(vec![RenameRequest::new(readme, "README.md")]).unwrap();
    assert!(report.is_success());
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["docs/", "docs/README.md"]);
    assert_eq!(read(&source, "docs/README.md").as_deref(), Some(&b"hello"[..]));
}

#[test]
fn parent_and_child_renames_compose() {
    let dir = temp_dir();
    let path = zip_fixture(
        dir.path(),
        "nested.zip",
        &[("a/", b""), ("a/b/", b""), ("a/b/x.txt", b"x"), ("a/b/keep.txt", b"k")],
    );
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let parent = batch.resolve(&source, "a/b/").unwrap();
    let child = batch.resolve(&source, "a/b/x.txt").unwrap();
    let report = batch
        .rename(vec![
            RenameRequest::new(parent, "c"),
            RenameRequest::new(child, "y.txt"),
        ])
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["a/", "a/c/", "a/c/keep.txt", "a/c/y.txt"]);
    assert_eq!(read(&source, "a/c/y.txt").as_deref(), Some(&b"x"[..]));
}

#[test]
fn stream_backed_entries_refuse_rename_but_stay_readable() {
    let source = ContainerSource::from_bytes("upload", zip_bytes(&[("note.txt", b"still here")]));

    let mut batch = Batch::default();
    let note = batch.resolve(&source, "note.txt").unwrap();
    let report = batch.rename(vec![RenameRequest::new(note, "other.txt")]).unwrap();
    let err = report.outcomes()[0].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOnStreamBackedEntry);
    assert!(!err.is_terminating());

    let data = batch.read_bytes(&source, "note.txt").unwrap();
    assert_eq!(data.as_deref(), Some(&b"still here"[..]));
    batch.dispose().unwrap();
}

#[test]
fn invalid_leaf_fails_before_mutation() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "leaf.zip", &[("a.txt", b"a"), ("b.txt", b"b")]);
    let source = ContainerSource::from_path(&path);
    let before = std::fs::read(&path).unwrap();

    let mut batch = Batch::default();
    let a = batch.resolve(&source, "a.txt").unwrap();
    let b = batch.resolve(&source, "b.txt").unwrap();
    let report = batch
        .rename(vec![
            RenameRequest::new(a, "sub/dir.txt"),
            RenameRequest::new(b, "what?.txt"),
        ])
        .unwrap();
    for outcome in report.outcomes() {
        assert_eq!(outcome.as_ref().unwrap_err().kind(), ErrorKind::InvalidName);
    }
    batch.dispose().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn missing_entry_is_reported_per_request() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "missing.zip", &[("keep.txt", b"k"), ("move.txt", b"m")]);
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let keep = batch.resolve(&source, "keep.txt").unwrap();
    let moved = batch.resolve(&source, "move.txt").unwrap();
    batch.remove(&keep).unwrap();

    let report = batch
        .rename(vec![
            RenameRequest::new(keep, "gone.txt"),
            RenameRequest::new(moved, "moved.txt"),
        ])
        .unwrap();
    assert_eq!(report.outcomes()[0].as_ref().unwrap_err().kind(), ErrorKind::EntryNotFound);
    assert!(report.outcomes()[1].is_ok());
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["moved.txt"]);
}

#[test]
fn tar_directory_rename_preserves_payloads() {
    let dir = temp_dir();
    let path = tar_gz_fixture(
        dir.path(),
        "tree.tar.gz",
        &[("pkg/", b""), ("pkg/bin/", b""), ("pkg/bin/tool", b"#!/bin/sh\n"), ("pkg/README", b"read me")],
    );
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let bin = batch.resolve(&source, "pkg/bin/").unwrap();
    let report = batch.rename(vec![RenameRequest::new(bin, "libexec")]).unwrap();
    assert!(report.is_success(), "{report:?}");
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["pkg/", "pkg/README", "pkg/libexec/", "pkg/libexec/tool"]);
    assert_eq!(read(&source, "pkg/libexec/tool").as_deref(), Some(&b"#!/bin/sh\n"[..]));
    assert_eq!(read(&source, "pkg/README").as_deref(), Some(&b"read me"[..]));
}

#[test]
fn implicit_directory_blocks_rename() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "implicit.zip", &[("old.txt", b"o"), ("new/inner.txt", b"i")]);
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let old = batch.resolve(&source, "old.txt").unwrap();
    let report = batch.rename(vec![RenameRequest::new(old, "new")]).unwrap();
    assert_eq!(report.outcomes()[0].as_ref().unwrap_err().kind(), ErrorKind::DuplicateEntry);
    batch.dispose().unwrap();
}

#[cfg(unix)]
#[test]
fn rewrite_keeps_archive_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "mode.zip", &[("a.txt", b"a")]);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let a = batch.resolve(&source, "a.txt").unwrap();
    assert!(batch.rename(vec![RenameRequest::new(a, "b.txt")]).unwrap().is_success());
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["b.txt"]);
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}

#[test]
fn file_and_directory_cannot_share_a_target() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "kinds.zip", &[("a/", b""), ("a/b/", b""), ("a/x", b"x")]);
    let source = ContainerSource::from_path(&path);

    let mut batch = Batch::default();
    let b = batch.resolve(&source, "a/b/").unwrap();
    let x = batch.resolve(&source, "a/x").unwrap();
    let report = batch
        .rename(vec![RenameRequest::new(b, "c"), RenameRequest::new(x, "c")])
        .unwrap();

    // `a/x` sorts after `a/b/`, so it is planned first and keeps the name.
    assert_eq!(report.outcomes()[0].as_ref().unwrap_err().kind(), ErrorKind::DuplicateEntry);
    assert!(report.outcomes()[1].is_ok());
    batch.dispose().unwrap();

    assert_eq!(listing(&source), ["a/", "a/b/", "a/c"]);
}

#[test]
fn one_call_spans_several_archives() {
    let dir = temp_dir();
    let first = ContainerSource::from_path(zip_fixture(
        dir.path(),
        "first.zip",
        &[("one.txt", b"1"), ("two.txt", b"2")],
    ));
    let second = ContainerSource::from_path(tar_gz_fixture(
        dir.path(),
        "second.tar.gz",
        &[("three.txt", b"3")],
    ));

    let mut batch = Batch::default();
    let one = batch.resolve(&first, "one.txt").unwrap();
    let three = batch.resolve(&second, "three.txt").unwrap();
    let two = batch.resolve(&first, "two.txt").unwrap();
    let report = batch
        .rename(vec![
            RenameRequest::new(one, "uno.txt"),
            RenameRequest::new(three, "tres.txt"),
            RenameRequest::new(two, "dos.txt"),
        ])
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    let targets: Vec<_> = report
        .outcomes()
        .iter()
        .map(|outcome| outcome.as_ref().unwrap()[0].new_relative_path.clone())
        .collect();
    assert_eq!(targets, ["uno.txt", "tres.txt", "dos.txt"]);
    for source in [&first, &second] {
        assert!(batch.handles().get(source).unwrap().is_dirty());
    }
    batch.dispose().unwrap();

    assert_eq!(listing(&first), ["dos.txt", "uno.txt"]);
    assert_eq!(listing(&second), ["tres.txt"]);
    assert_eq!(read(&second, "tres.txt").as_deref(), Some(&b"3"[..]));
}

#[test]
fn cancelled_rename_reports_every_request() {
    let dir = temp_dir();
    let path = zip_fixture(dir.path(), "cancel.zip", &[("a.txt", b"a")]);
    let source = ContainerSource::from_path(&path);
    let before = std::fs::read(&path).unwrap();

    let mut batch = Batch::default();
    let a = batch.resolve(&source, "a.txt").unwrap();
    batch.cancel_token().cancel();
    let report = batch.rename(vec![RenameRequest::new(a, "b.txt")]).unwrap();
    assert_eq!(report.outcomes()[0].as_ref().unwrap_err().kind(), ErrorKind::Cancelled);
    batch.dispose().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
}
