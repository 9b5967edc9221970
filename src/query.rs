//! Read-only queries over a built [`Tree`], and the thin POSIX-shaped
//! operation surface (`FilesystemOps`) a syscall dispatcher would call into.
//!
//! This module intentionally knows nothing about FUSE; it exposes plain
//! methods with POSIX-like signatures so an embedder can wire them into
//! `fuser` (or any other session loop) without this crate depending on it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::data_node::Stat;
use crate::error::Errno;
use crate::file_node::NodeRef;
use crate::reader::Reader;
use crate::tree::Tree;

/// A directory entry as returned by `readdir`.
pub struct DirEntry {
    pub name: String,
    pub stat: Stat,
}

/// Filesystem-wide statistics, as returned by `statfs`.
pub struct FsStat {
    pub block_size: u64,
    pub blocks: u64,
    pub files: u64,
    pub read_only: bool,
}

/// An open file: a reference-counted reader plus the byte position tracking
/// isn't needed here since every `read` call specifies an absolute offset.
pub struct FileHandle {
    reader: Rc<RefCell<Reader>>,
}

impl Tree {
    pub fn query(&self) -> TreeQuery<'_> {
        TreeQuery { tree: self }
    }
}

/// Borrowing wrapper exposing the read-only query surface over a [`Tree`].
pub struct TreeQuery<'a> {
    tree: &'a Tree,
}

impl<'a> TreeQuery<'a> {
    pub fn find(&self, path: &str) -> Option<NodeRef> {
        self.tree.find(path)
    }

    pub fn block_count(&self) -> u64 {
        self.tree.block_count()
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }
}

/// The seven inbound operations of the external filesystem interface.
pub struct FilesystemOps {
    tree: Tree,
}

impl FilesystemOps {
    pub fn new(tree: Tree) -> Self {
        FilesystemOps { tree }
    }

    pub fn getattr(&self, path: &str) -> Result<Stat, Errno> {
        self.tree.find(path).map(|n| n.borrow().stat()).ok_or(Errno::NoEnt)
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, Errno> {
        let node = self.tree.find(path).ok_or(Errno::NoEnt)?;
        if !node.borrow().is_dir() {
            return Err(Errno::NotDir);
        }
        let mut entries = vec![
            DirEntry { name: ".".to_string(), stat: node.borrow().stat() },
            DirEntry { name: "..".to_string(), stat: parent_stat(&node) },
        ];
        for child in &node.borrow().children {
            entries.push(DirEntry { name: child.borrow().name.clone(), stat: child.borrow().stat() });
        }
        Ok(entries)
    }

    pub fn open(&self, path: &str) -> Result<FileHandle, Errno> {
        let node = self.tree.find(path).ok_or(Errno::NoEnt)?;
        if node.borrow().is_dir() {
            return Err(Errno::IsDir);
        }
        let reader = node.borrow().get_reader(&self.tree.archive).map_err(|e| Errno::from(&e))?;
        Ok(FileHandle { reader })
    }

    pub fn read(&self, handle: &FileHandle, offset: u64, dest: &mut [u8]) -> Result<usize, Errno> {
        handle.reader.borrow_mut().read_at(dest, offset).map_err(|e| Errno::from(&e))
    }

    /// Always succeeds; dropping the handle's `Rc` is what releases the
    /// reader (and, for a `BufferedReader`, allows the owning `DataNode`'s
    /// cache slot to go stale once the last clone is gone).
    pub fn release(&self, _handle: FileHandle) {}

    /// Symlink targets are stored one of two ways: inline in the PKWARE Unix
    /// field (a zero-size "virtual" symlink), or as the entry's decompressed
    /// content (an ordinary symlink). `FileNode::link_if_symlink` only covers
    /// the first; for the second, the target is read back through the normal
    /// entry reader.
    pub fn readlink(&self, path: &str) -> Result<Vec<u8>, Errno> {
        let node = self.tree.find(path).ok_or(Errno::NoEnt)?;
        if node.borrow().file_type() != crate::data_node::FileType::Symlink {
            return Err(Errno::Inval);
        }
        if let Some(inline) = node.borrow().link_if_symlink() {
            return Ok(inline);
        }
        let size = node.borrow().stat().size as usize;
        let reader = node.borrow().get_reader(&self.tree.archive).map_err(|e| Errno::from(&e))?;
        let mut buf = vec![0u8; size];
        let mut total = 0;
        while total < buf.len() {
            let n = reader.borrow_mut().read_at(&mut buf[total..], total as u64).map_err(|e| Errno::from(&e))?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }

    pub fn statfs(&self) -> FsStat {
        FsStat { block_size: crate::data_node::BLOCK_SIZE, blocks: self.tree.block_count(), files: self.tree.node_count() as u64, read_only: true }
    }
}

fn parent_stat(node: &NodeRef) -> Stat {
    let parent = node.borrow().parent.clone().and_then(|p| p.upgrade());
    match parent {
        Some(p) => p.borrow().stat(),
        None => node.borrow().stat(), // root is its own parent for readdir purposes
    }
}
