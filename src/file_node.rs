//! The directory-tree node: name, parent/child linkage, and the effective
//! [`DataNode`] a node projects (itself for primaries, a hardlink target for
//! hardlinks).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::archive::ArchiveSource;
use crate::data_node::{DataNode, FileType, Stat};
use crate::error::Result;
use crate::reader::Reader;

pub type NodeRef = Rc<RefCell<FileNode>>;

/// One named entry in the projected tree.
///
/// Ownership of a `DataNode` is expressed by `Rc` refcounting rather than by
/// a separate owning field: a primary entry's `link` is a fresh `Rc`; a
/// hardlink's `link` is a clone of its target's `Rc`. `DataNode::nlink` is
/// tracked separately (it must reach every hardlinked node even though the
/// `Rc` strong count also includes this crate's own transient references),
/// so it's bumped explicitly by the tree builder on every hardlink/directory
/// attach rather than derived from `Rc::strong_count`.
pub struct FileNode {
    /// Backing ZIP entry index. `None` for synthesized directories.
    pub id: Option<u64>,
    pub name: String,
    pub parent: Option<Weak<RefCell<FileNode>>>,
    link: Rc<RefCell<DataNode>>,
    pub original_path: Option<Box<str>>,
    pub children: Vec<NodeRef>,
    pub collision_count: u32,
}

impl FileNode {
    pub fn new_root() -> NodeRef {
        let data = Rc::new(RefCell::new(DataNode::synthesized_dir(0o755)));
        Rc::new(RefCell::new(FileNode { id: None, name: "/".to_string(), parent: None, link: data, original_path: None, children: Vec::new(), collision_count: 0 }))
    }

    /// A synthesized intermediate directory, not backed by a ZIP entry.
    pub fn new_synthesized_dir(name: String, parent: &NodeRef) -> NodeRef {
        let data = Rc::new(RefCell::new(DataNode::synthesized_dir(0o755)));
        Rc::new(RefCell::new(FileNode {
            id: None,
            name,
            parent: Some(Rc::downgrade(parent)),
            link: data,
            original_path: None,
            children: Vec::new(),
            collision_count: 0,
        }))
    }

    /// A primary node owning its own `DataNode`.
    pub fn new_primary(id: u64, name: String, parent: &NodeRef, data: DataNode) -> NodeRef {
        Rc::new(RefCell::new(FileNode {
            id: Some(id),
            name,
            parent: Some(Rc::downgrade(parent)),
            link: Rc::new(RefCell::new(data)),
            original_path: None,
            children: Vec::new(),
            collision_count: 0,
        }))
    }

    /// A hardlink node sharing `target_link`'s `DataNode`. The caller is
    /// responsible for bumping `target_link.borrow_mut().nlink`.
    pub fn new_hardlink(id: u64, name: String, parent: &NodeRef, target_link: Rc<RefCell<DataNode>>) -> NodeRef {
        Rc::new(RefCell::new(FileNode { id: Some(id), name, parent: Some(Rc::downgrade(parent)), link: target_link, original_path: None, children: Vec::new(), collision_count: 0 }))
    }

    pub fn add_child(parent: &NodeRef, child: NodeRef) {
        parent.borrow_mut().children.push(child);
    }

    pub fn link(&self) -> Rc<RefCell<DataNode>> {
        Rc::clone(&self.link)
    }

    /// Replaces the effective `DataNode`, preserving nothing automatically —
    /// callers that need to carry a synthesized directory's `nlink` across
    /// the swap must copy it themselves first.
    pub fn set_link(&mut self, link: Rc<RefCell<DataNode>>) {
        self.link = link;
    }

    pub fn stat(&self) -> Stat {
        self.link.borrow().stat()
    }

    pub fn file_type(&self) -> FileType {
        self.link.borrow().file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Full path from the root, computed by recursive parent concatenation.
    pub fn path(node: &NodeRef) -> String {
        let n = node.borrow();
        match &n.parent {
            None => "/".to_string(),
            Some(parent) => {
                let parent = parent.upgrade().expect("parent outlives child");
                let parent_path = FileNode::path(&parent);
                if parent_path == "/" {
                    format!("/{}", n.name)
                } else {
                    format!("{parent_path}/{}", n.name)
                }
            }
        }
    }

    pub fn get_reader(&self, archive: &Rc<RefCell<dyn ArchiveSource>>) -> Result<Rc<RefCell<Reader>>> {
        self.link.borrow().get_reader(archive)
    }

    /// The inline symlink target, for a zero-size "virtual" symlink whose
    /// target came from the PKWARE Unix field rather than entry content.
    /// `None` for a non-symlink, and for an ordinary symlink whose target is
    /// the entry's decompressed content (see `query::FilesystemOps::readlink`).
    pub fn link_if_symlink(&self) -> Option<Vec<u8>> {
        let data = self.link.borrow();
        if data.file_type() == FileType::Symlink && !data.target.is_empty() {
            Some(data.target.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_slash() {
        let root = FileNode::new_root();
        assert_eq!(FileNode::path(&root), "/");
    }

    #[test]
    fn nested_path_joins_with_slash() {
        let root = FileNode::new_root();
        let a = FileNode::new_synthesized_dir("a".into(), &root);
        FileNode::add_child(&root, Rc::clone(&a));
        let b = FileNode::new_synthesized_dir("b".into(), &a);
        FileNode::add_child(&a, Rc::clone(&b));
        assert_eq!(FileNode::path(&a), "/a");
        assert_eq!(FileNode::path(&b), "/a/b");
    }
}
