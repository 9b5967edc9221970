use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::rc::Rc;

use zip::write::{ExtendedFileOptions, FileOptions, SimpleFileOptions};
use zip::ZipWriter;

use zipfs_core::{ArchiveSource, Options, Tree, ZipArchiveSource};

const NTFS_TO_UNIX_OFFSET_100NS: i64 = (369 * 365 + 89) * 24 * 3600 * 10_000_000;

fn simple_opts() -> SimpleFileOptions {
    SimpleFileOptions::default().unix_permissions(0o644)
}

fn build_tree(bytes: Vec<u8>, options: &Options) -> Tree {
    let source = ZipArchiveSource::open(Cursor::new(bytes)).expect("open archive");
    let archive: Rc<RefCell<dyn ArchiveSource>> = Rc::new(RefCell::new(source));
    Tree::build(archive, options).expect("build tree")
}

fn extended_timestamp_mtime_only(secs: u32) -> Vec<u8> {
    let mut bytes = vec![0x01u8];
    bytes.extend_from_slice(&secs.to_le_bytes());
    bytes
}

fn ntfs_times(secs: i64, nanos: u32) -> Vec<u8> {
    let ticks = (secs * 10_000_000 + (nanos / 100) as i64 + NTFS_TO_UNIX_OFFSET_100NS) as u64;
    let mut bytes = vec![0u8; 4]; // reserved
    bytes.extend_from_slice(&1u16.to_le_bytes()); // tag 0x0001
    bytes.extend_from_slice(&24u16.to_le_bytes()); // sub-record size
    bytes.extend_from_slice(&ticks.to_le_bytes()); // mtime
    bytes.extend_from_slice(&ticks.to_le_bytes()); // atime
    bytes.extend_from_slice(&ticks.to_le_bytes()); // ctime
    bytes
}

fn pkware_unix_symlink(target: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 12]; // atime, mtime, uid, gid
    bytes.extend_from_slice(target);
    bytes
}

#[test]
fn empty_archive_has_only_root() {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let buf = zip.finish().unwrap().into_inner();

    let tree = build_tree(buf, &Options::default());
    let query = tree.query();
    assert_eq!(query.node_count(), 1);

    let root = query.find("/").expect("root exists");
    assert!(root.borrow().is_dir());
    assert!(root.borrow().children.is_empty());
}

/// Scenario 1: `{"a/", "a/b", "a/b/c"}` — `a/b` is both a file and (via
/// `a/b/c`) a required directory; the file is displaced and renamed.
#[test]
fn directory_synthesis_resolves_name_collision() {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.add_directory("a/", simple_opts()).unwrap();
    zip.start_file("a/b", simple_opts()).unwrap();
    zip.write_all(b"file b").unwrap();
    zip.start_file("a/b/c", simple_opts()).unwrap();
    zip.write_all(b"file c").unwrap();
    let buf = zip.finish().unwrap().into_inner();

    let tree = build_tree(buf, &Options::default());
    let query = tree.query();

    let a_b = query.find("/a/b").expect("/a/b exists");
    assert!(a_b.borrow().is_dir(), "/a/b must become a directory");

    let a_b_c = query.find("/a/b/c").expect("/a/b/c exists");
    assert!(!a_b_c.borrow().is_dir());

    let displaced = query.find("/a/b (1)").expect("displaced file survives under a renamed path");
    assert!(!displaced.borrow().is_dir());

    let a = query.find("/a").expect("/a exists");
    let child_names: HashSet<String> = a.borrow().children.iter().map(|c| c.borrow().name.clone()).collect();
    assert_eq!(child_names, HashSet::from(["b".to_string(), "b (1)".to_string()]));
}

/// Scenario 2: NTFS and Extended Timestamp both describe `mtime`; NTFS wins.
#[test]
fn ntfs_timestamp_wins_over_extended_timestamp() {
    let mut options = FileOptions::<ExtendedFileOptions>::default().unix_permissions(0o644);
    options.add_extra_data(0x5455, extended_timestamp_mtime_only(1_560_435_721).into_boxed_slice(), false).unwrap();
    options.add_extra_data(0x000A, ntfs_times(1_560_435_721, 722_114_700).into_boxed_slice(), false).unwrap();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("x", options).unwrap();
    zip.write_all(b"content").unwrap();
    let buf = zip.finish().unwrap().into_inner();

    let tree = build_tree(buf, &Options::default());
    let query = tree.query();
    let node = query.find("/x").expect("/x exists");
    let stat = node.borrow().stat();
    assert_eq!(stat.mtime.secs, 1_560_435_721);
    assert_eq!(stat.mtime.nanos, 722_114_700);
}

/// Scenario 3: absolute and parent-relative paths route under `/ROOT`/`/UP`.
#[test]
fn absolute_and_parent_relative_paths_get_prefixed() {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("/abs", simple_opts()).unwrap();
    zip.write_all(b"abs").unwrap();
    zip.start_file("../up", simple_opts()).unwrap();
    zip.write_all(b"up").unwrap();
    let buf = zip.finish().unwrap().into_inner();

    let tree = build_tree(buf, &Options::default());
    let query = tree.query();

    assert!(query.find("/ROOT/abs").is_some());
    assert!(query.find("/UP/up").is_some());
    assert!(query.find("/CUR").is_none());
}

/// Scenario 4: a zero-size symlink entry carrying its target inline in the
/// PKWARE Unix field.
#[test]
fn inline_symlink_target_from_pkware_field() {
    let mut options = FileOptions::<ExtendedFileOptions>::default().unix_permissions(0o120777);
    options.add_extra_data(0x000D, pkware_unix_symlink(b"target").into_boxed_slice(), false).unwrap();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("link", options).unwrap();
    let buf = zip.finish().unwrap().into_inner();

    let tree = build_tree(buf, &Options::default());
    let fs = zipfs_core::FilesystemOps::new(tree);
    let target = fs.readlink("/link").expect("readlink succeeds");
    assert_eq!(target, b"target");
}
