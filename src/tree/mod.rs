//! The tree builder: ingests a ZIP archive's entries and produces a
//! `FileNode` graph rooted at `/`.

pub mod encoding;
pub mod password;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::archive::ArchiveSource;
use crate::config::Options;
use crate::data_node::{derive_attributes, DataNode, FileType};
use crate::error::{Error, Result};
use crate::extra_field::{self, ExtraFieldLocation};
use crate::file_node::{FileNode, NodeRef};
use crate::path as pathnorm;

/// The built tree: owns every node via the by-path index, and answers the
/// read-only queries in `crate::query`.
pub struct Tree {
    pub(crate) root: NodeRef,
    pub(crate) by_path: HashMap<String, NodeRef>,
    by_original_path: HashMap<String, NodeRef>,
    pub(crate) archive: Rc<RefCell<dyn ArchiveSource>>,
    total_block_count: u64,
    checked_password: bool,
}

struct DeferredHardlink {
    id: u64,
    raw_name: Vec<u8>,
    mode: u32,
}

impl Tree {
    /// Runs the full build algorithm (§4.6) over `archive`.
    pub fn build(archive: Rc<RefCell<dyn ArchiveSource>>, options: &Options) -> Result<Tree> {
        let root = FileNode::new_root();
        let mut tree = Tree { by_path: HashMap::new(), by_original_path: HashMap::new(), root: Rc::clone(&root), archive, total_block_count: 0, checked_password: false };
        tree.by_path.insert("/".to_string(), Rc::clone(&root));

        let num_entries = tree.archive.borrow().num_entries();

        // Step 2: prefix probe + encoding sample, in one pass over raw names.
        let mut sample = encoding::SampleBuffer::new();
        let mut need_prefix = false;
        let mut raw_names = Vec::with_capacity(num_entries as usize);
        for id in 0..num_entries {
            let raw = tree.archive.borrow().raw_name(id).unwrap_or_default();
            sample.push(&raw);
            if let Ok(name) = std::str::from_utf8(&raw) {
                if name.starts_with('/') || name.starts_with("../") {
                    need_prefix = true;
                }
            }
            raw_names.push(raw);
        }
        let decoder = encoding::resolve(&options.encoding, sample.as_slice());

        let mut hardlinks = Vec::new();

        // Pass 1: everything except hardlinks.
        for id in 0..num_entries {
            if raw_names[id as usize].is_empty() {
                error!(index = id, "entry has no name, skipping");
                continue;
            }
            let decoded_name = decoder.decode(&raw_names[id as usize]);

            let (os_made_by, external_attrs) = match tree.archive.borrow_mut().external_attributes(id) {
                Ok(v) => v,
                Err(e) => {
                    error!(index = id, error = %e, "could not read external attributes, skipping");
                    continue;
                }
            };
            let ends_with_slash = decoded_name.ends_with('/');
            let (mode, is_hardlink) = derive_attributes(os_made_by, external_attrs, ends_with_slash);

            let normalized = match pathnorm::normalize(&decoded_name, need_prefix) {
                Ok(p) => p,
                Err(e) => {
                    error!(index = id, error = %e, "invalid path, skipping");
                    continue;
                }
            };

            let original_path: Box<str> = decoded_name.trim_end_matches('/').to_string().into_boxed_str();

            if FileType::from_mode(mode) == FileType::Directory {
                let dir = tree.create_dir(&normalized);
                let data = match DataNode::make(&mut *tree.archive.borrow_mut(), id, mode) {
                    Ok(d) => d,
                    Err(e) => {
                        error!(index = id, error = %e, "could not decode directory entry, skipping");
                        continue;
                    }
                };
                let preserved_nlink = dir.borrow().link().borrow().nlink;
                let new_data = Rc::new(RefCell::new(data));
                new_data.borrow_mut().nlink = preserved_nlink;
                dir.borrow_mut().set_link(new_data);
                dir.borrow_mut().id = Some(id);
                dir.borrow_mut().original_path = Some(original_path.clone());
                tree.by_original_path.insert(original_path.to_string(), Rc::clone(&dir));
                tree.total_block_count += 1;
                continue;
            }

            let file_type = FileType::from_mode(mode);
            if matches!(file_type, FileType::Symlink) && !options.include_symlinks {
                info!(index = id, "skipping symlink entry (symlinks disabled)");
                continue;
            }
            if matches!(file_type, FileType::Fifo | FileType::Socket | FileType::BlockDevice | FileType::CharDevice) && !options.include_special_files {
                info!(index = id, "skipping special file entry (special files disabled)");
                continue;
            }

            if is_hardlink {
                if options.include_hardlinks {
                    hardlinks.push(DeferredHardlink { id, raw_name: raw_names[id as usize].clone(), mode });
                } else {
                    info!(index = id, "skipping hardlink entry (hardlinks disabled)");
                }
                continue;
            }

            let (parent_path, name) = split_path(&normalized);
            let parent = tree.create_dir(&parent_path);
            let data = match DataNode::make(&mut *tree.archive.borrow_mut(), id, mode) {
                Ok(d) => d,
                Err(e) => {
                    error!(index = id, error = %e, "could not decode entry, skipping");
                    continue;
                }
            };
            let stat_blocks = data.stat().blocks;
            let node = FileNode::new_primary(id, name, &parent, data);
            FileNode::add_child(&parent, Rc::clone(&node));
            node.borrow_mut().original_path = Some(original_path.clone());
            tree.attach(node.clone());
            tree.by_original_path.insert(original_path.to_string(), node.clone());
            tree.total_block_count += 1 + stat_blocks;

            tree.check_compression_and_encryption(id, options)?;
            tree.maybe_check_password(id, options)?;
        }

        // Pass 2: hardlinks, resolved against by_original_path.
        for link in hardlinks {
            let decoded_name = decoder.decode(&link.raw_name);
            let normalized = match pathnorm::normalize(&decoded_name, need_prefix) {
                Ok(p) => p,
                Err(e) => {
                    error!(index = link.id, error = %e, "invalid hardlink path, skipping");
                    continue;
                }
            };
            let (parent_path, name) = split_path(&normalized);
            let parent = tree.create_dir(&parent_path);
            let original_path: Box<str> = decoded_name.trim_end_matches('/').to_string().into_boxed_str();

            let node = tree.create_hardlink(link.id, name, &parent, link.mode)?;
            FileNode::add_child(&parent, Rc::clone(&node));
            node.borrow_mut().original_path = Some(original_path.clone());
            tree.attach(node.clone());
            tree.by_original_path.insert(original_path.to_string(), node);
            tree.total_block_count += 1;
        }

        Ok(tree)
    }

    fn check_compression_and_encryption(&mut self, id: u64, options: &Options) -> Result<()> {
        let stat = self.archive.borrow_mut().stat(id)?;
        let archive = self.archive.borrow();
        if !archive.compression_supported(stat.compression) {
            let code = crate::data_node::compression_method_code(stat.compression);
            if options.check_compression {
                return Err(Error::UnsupportedCompression { index: id, method: code });
            }
            error!(index = id, method = code, "unsupported compression method");
        }
        if !archive.encryption_supported(stat.encryption) {
            if options.check_compression {
                return Err(Error::UnsupportedEncryption { index: id });
            }
            error!(index = id, "unsupported encryption method");
        }
        Ok(())
    }

    /// Prompts for and verifies a password, at most once per mount, the first
    /// time an encrypted entry is seen.
    fn maybe_check_password(&mut self, id: u64, options: &Options) -> Result<()> {
        if self.checked_password {
            return Ok(());
        }
        let stat = self.archive.borrow_mut().stat(id)?;
        if crate::data_node::encryption_is_none(stat.encryption) {
            return Ok(());
        }
        self.checked_password = true;

        info!(index = id, "archive entry is encrypted, prompting for password");
        if let Some(password) = password::read_password_from_stdin().map_err(Error::Io)? {
            self.archive.borrow_mut().set_default_password(password);
        }

        // Probe by reading a small window; a wrong password surfaces as a
        // decode error on the very first bytes.
        let mut probe = [0u8; 16];
        let probe_result = self.archive.borrow_mut().open_entry(id).and_then(|mut r| r.read(&mut probe).map_err(Error::Io));
        if let Err(e) = probe_result {
            if options.check_password {
                return Err(e);
            }
            warn!(index = id, error = %e, "password verification failed, continuing anyway");
        }
        Ok(())
    }

    /// Looks up `path` in the by-path index, stripping one trailing `/`
    /// (the FUSE subdir convention of re-appending one).
    pub fn find(&self, path: &str) -> Option<NodeRef> {
        let trimmed = path.strip_suffix('/').unwrap_or(path);
        let key = if trimmed.is_empty() { "/" } else { trimmed };
        self.by_path.get(key).cloned()
    }

    pub fn block_count(&self) -> u64 {
        self.total_block_count
    }

    pub fn node_count(&self) -> usize {
        self.by_path.len()
    }

    /// Idempotent: returns the existing directory at `path`, synthesizing it
    /// (and any missing ancestors) if needed. If a non-directory node already
    /// occupies `path`, it's displaced and reattached under a renamed path.
    fn create_dir(&mut self, path: &str) -> NodeRef {
        if let Some(existing) = self.find(path) {
            if existing.borrow().is_dir() {
                return existing;
            }
            let to_rename = existing;
            let parent = to_rename.borrow().parent.clone().and_then(|p| p.upgrade()).unwrap_or_else(|| Rc::clone(&self.root));
            self.by_path.remove(path);
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            let dir = FileNode::new_synthesized_dir(name, &parent);
            FileNode::add_child(&parent, Rc::clone(&dir));
            self.by_path.insert(path.to_string(), Rc::clone(&dir));
            parent.borrow().link().borrow_mut().nlink += 1;
            self.attach(to_rename);
            return dir;
        }

        if path == "/" {
            return Rc::clone(&self.root);
        }

        let (parent_path, name) = split_path(path);
        let parent = self.create_dir(&parent_path);
        let dir = FileNode::new_synthesized_dir(name, &parent);
        FileNode::add_child(&parent, Rc::clone(&dir));
        self.by_path.insert(path.to_string(), Rc::clone(&dir));
        parent.borrow().link().borrow_mut().nlink += 1;
        dir
    }

    /// Inserts `node` into the by-path index at its current path, resolving
    /// collisions by renaming the new node `"name (N)ext"`, where `N` is the
    /// *existing* occupant's collision counter.
    fn attach(&mut self, node: NodeRef) {
        loop {
            let path = FileNode::path(&node);
            match self.by_path.get(&path) {
                None => {
                    self.by_path.insert(path, node);
                    return;
                }
                Some(existing) => {
                    if Rc::ptr_eq(existing, &node) {
                        return;
                    }
                    let mut existing_mut = existing.borrow_mut();
                    existing_mut.collision_count += 1;
                    let n = existing_mut.collision_count;
                    drop(existing_mut);

                    let (stem, ext) = split_extension(&node.borrow().name);
                    let new_name = format!("{stem} ({n}){ext}");
                    debug!(old_name = %node.borrow().name, new_name = %new_name, "resolving name collision");
                    node.borrow_mut().name = new_name;
                }
            }
        }
    }

    /// Resolves a deferred hardlink entry against `by_original_path`, falling
    /// back to a primary node if the target is missing, unparseable, or
    /// type-mismatched (symlink-typed hardlinks tolerate a type mismatch).
    fn create_hardlink(&mut self, id: u64, name: String, parent: &NodeRef, mode: u32) -> Result<NodeRef> {
        let is_device = matches!(FileType::from_mode(mode), FileType::BlockDevice | FileType::CharDevice);
        let mut target_path = None;
        for location in [ExtraFieldLocation::CentralDirectory, ExtraFieldLocation::LocalHeader] {
            let fields = self.archive.borrow_mut().extra_fields(id, location)?;
            for (type_id, payload) in fields {
                if type_id == extra_field::ID_PKWARE_UNIX {
                    if let Some(field) = extra_field::parse_pkware_unix(&payload, is_device) {
                        if !field.link_target.is_empty() {
                            target_path = String::from_utf8(field.link_target).ok();
                        }
                    }
                }
            }
        }

        let target_path = match target_path {
            Some(p) => p,
            None => {
                info!(index = id, "hardlink entry has no usable PKWARE Unix field, treating as a primary file");
                return self.create_file(id, name, parent, mode);
            }
        };

        let trimmed = target_path.trim_end_matches('/').to_string();
        let target = match self.by_original_path.get(&trimmed) {
            Some(t) => Rc::clone(t),
            None => {
                warn!(index = id, target = %trimmed, "hardlink target not found, treating as a primary file");
                return self.create_file(id, name, parent, mode);
            }
        };

        let target_type = target.borrow().file_type();
        let this_type = FileType::from_mode(mode);
        if target_type != this_type && this_type != FileType::Symlink {
            warn!(index = id, target = %trimmed, "hardlink target type mismatch, treating as a primary file");
            return self.create_file(id, name, parent, mode);
        }

        let target_link = target.borrow().link();
        target_link.borrow_mut().nlink += 1;
        Ok(FileNode::new_hardlink(id, name, parent, target_link))
    }

    /// Creates a regular primary node; the fallback path for a hardlink entry
    /// whose target couldn't be resolved.
    fn create_file(&mut self, id: u64, name: String, parent: &NodeRef, mode: u32) -> Result<NodeRef> {
        let data = DataNode::make(&mut *self.archive.borrow_mut(), id, mode)?;
        Ok(FileNode::new_primary(id, name, parent, data))
    }
}

/// Splits `"/a/b/c"` into `("/a/b", "c")`; `"/a"` into `("/", "a")`.
fn split_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// Splits a name into `(stem, ext)` where `ext` includes the leading `.`.
/// A leading or trailing dot doesn't count as an extension separator.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) => (name, ""),
        Some(idx) if idx == name.len() - 1 => (name, ""),
        Some(idx) => (&name[..idx], &name[idx..]),
        None => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_basic() {
        assert_eq!(split_path("/a/b/c"), ("/a/b".to_string(), "c".to_string()));
        assert_eq!(split_path("/a"), ("/".to_string(), "a".to_string()));
    }

    #[test]
    fn split_extension_ignores_leading_dot() {
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
    }

    #[test]
    fn split_extension_ignores_trailing_dot() {
        assert_eq!(split_extension("name."), ("name.", ""));
    }

    #[test]
    fn split_extension_normal_case() {
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
    }
}
