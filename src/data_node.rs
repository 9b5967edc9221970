//! The inode-like record backing every entry in the projected tree.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::archive::{ArchiveEntryReader, ArchiveSource, CompressionMethod, EncryptionMethod, OS_DOS, OS_MVS, OS_NTFS, OS_UNIX};
use crate::error::{Error, Result};
use crate::extra_field::{self, ExtraFieldLocation, Timestamp, UnixFieldMerge};
use crate::reader::{BufferedReader, Reader, StringReader, UnbufferedReader};

pub const BLOCK_SIZE: u64 = 512;

/// POSIX file type, encoded the same way a `mode_t`'s type bits would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Unknown,
    BlockDevice,
    CharDevice,
    Directory,
    Fifo,
    Regular,
    Socket,
    Symlink,
}

impl FileType {
    /// Extracts the file type from a `mode_t`-shaped value's high bits.
    pub fn from_mode(mode: u32) -> FileType {
        const S_IFMT: u32 = 0o170000;
        match mode & S_IFMT {
            0o140000 => FileType::Socket,
            0o120000 => FileType::Symlink,
            0o100000 => FileType::Regular,
            0o060000 => FileType::BlockDevice,
            0o040000 => FileType::Directory,
            0o020000 => FileType::CharDevice,
            0o010000 => FileType::Fifo,
            _ => FileType::Unknown,
        }
    }

    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Socket => 0o140000,
            FileType::Symlink => 0o120000,
            FileType::Regular => 0o100000,
            FileType::BlockDevice => 0o060000,
            FileType::Directory => 0o040000,
            FileType::CharDevice => 0o020000,
            FileType::Fifo => 0o010000,
            FileType::Unknown => 0,
        }
    }

    pub fn set_on(self, mode: u32) -> u32 {
        const S_IFMT: u32 = 0o170000;
        (mode & !S_IFMT) | self.mode_bits()
    }
}

fn next_ino() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn now() -> Timestamp {
    let dur = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    Timestamp { secs: dur.as_secs() as i64, nanos: dur.subsec_nanos() }
}

/// A `stat`-shaped projection of a [`DataNode`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub rdev: (u32, u32),
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
}

/// One distinct inode: metadata plus how to read its content.
pub struct DataNode {
    pub ino: u64,
    /// Entry index backing this node, or `None` for synthesized directories.
    pub id: Option<u64>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub dev: (u32, u32),
    pub size: u64,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    /// Non-empty only for a symlink whose target was inlined in the PKWARE
    /// Unix extra field rather than stored as entry content.
    pub target: Vec<u8>,
    pub nlink: u32,
    cached_reader: RefCell<Option<Weak<RefCell<Reader>>>>,
}

impl DataNode {
    /// A synthesized directory with no backing ZIP entry.
    pub fn synthesized_dir(mode: u32) -> Self {
        let t = now();
        DataNode {
            ino: next_ino(),
            id: None,
            mode: FileType::Directory.set_on(mode),
            uid: 0,
            gid: 0,
            dev: (0, 0),
            size: 0,
            mtime: t,
            atime: t,
            ctime: t,
            target: Vec::new(),
            nlink: 2,
            cached_reader: RefCell::new(None),
        }
    }

    /// Builds a `DataNode` for ZIP entry `id`, merging central-directory and
    /// local-header extra fields per the precedence rules in `extra_field`.
    pub fn make(archive: &mut dyn ArchiveSource, id: u64, mode: u32) -> Result<Self> {
        let stat = archive.stat(id)?;
        let t0 = Timestamp::from_unix_secs(stat.mtime_unix.max(0) as u32);

        let mut node = DataNode {
            ino: next_ino(),
            id: Some(id),
            mode,
            uid: 0,
            gid: 0,
            dev: (0, 0),
            size: stat.size,
            mtime: t0,
            atime: t0,
            ctime: t0,
            target: Vec::new(),
            nlink: 1,
            cached_reader: RefCell::new(None),
        };

        let has_pkware_field = node.process_extra_fields(archive, id)?;

        // Info-ZIP sometimes mislabels regular files as FIFO.
        if FileType::from_mode(node.mode) == FileType::Fifo && (node.size != 0 || !has_pkware_field) {
            node.mode = FileType::Regular.set_on(node.mode);
        }

        Ok(node)
    }

    /// Reads both central-directory and local-header extra fields for `id`
    /// and merges them into `self`, per §4.1. Returns whether a PKWARE Unix
    /// field was present anywhere (used by the FIFO-mislabel fix).
    fn process_extra_fields(&mut self, archive: &mut dyn ArchiveSource, id: u64) -> Result<bool> {
        let mut merge = UnixFieldMerge::new();
        let mut has_pkware_field = false;
        let is_device = matches!(FileType::from_mode(self.mode), FileType::BlockDevice | FileType::CharDevice);

        for location in [ExtraFieldLocation::CentralDirectory, ExtraFieldLocation::LocalHeader] {
            for (type_id, payload) in archive.extra_fields(id, location)? {
                match type_id {
                    extra_field::ID_NTFS => {
                        if let Some(field) = extra_field::parse_ntfs(&payload) {
                            merge.apply_ntfs(field, &mut self.mtime, &mut self.atime, &mut self.ctime);
                        }
                    }
                    extra_field::ID_EXTENDED_TIMESTAMP => {
                        if let Some(field) = extra_field::parse_extended_timestamp(&payload) {
                            merge.apply_extended_timestamp(field, &mut self.mtime, &mut self.atime, &mut self.ctime);
                        }
                    }
                    extra_field::ID_PKWARE_UNIX => {
                        has_pkware_field = true;
                        if let Some(field) = extra_field::parse_pkware_unix(&payload, is_device) {
                            merge.apply_simple_unix_times(field.atime, field.mtime, &mut self.mtime, &mut self.atime);
                            if merge.apply_unix_uid_gid(type_id) {
                                if let Some(uid) = field.uid {
                                    self.uid = uid as u32;
                                }
                                if let Some(gid) = field.gid {
                                    self.gid = gid as u32;
                                }
                            }
                            if let Some(dev) = field.device {
                                self.dev = dev;
                            }
                            if FileType::from_mode(self.mode) == FileType::Symlink && self.size == 0 && !field.link_target.is_empty() {
                                self.target = field.link_target;
                            }
                        }
                    }
                    extra_field::ID_INFOZIP_UNIX1 => {
                        if let Some(field) = extra_field::parse_infozip_unix1(&payload) {
                            merge.apply_simple_unix_times(field.atime, field.mtime, &mut self.mtime, &mut self.atime);
                            if merge.apply_unix_uid_gid(type_id) {
                                if let Some(uid) = field.uid {
                                    self.uid = uid as u32;
                                }
                                if let Some(gid) = field.gid {
                                    self.gid = gid as u32;
                                }
                            }
                        }
                    }
                    extra_field::ID_INFOZIP_UNIX2 => {
                        if let Some(field) = extra_field::parse_infozip_unix2(&payload) {
                            if merge.apply_unix_uid_gid(type_id) {
                                self.uid = field.uid;
                                self.gid = field.gid;
                            }
                        }
                    }
                    extra_field::ID_INFOZIP_UNIXN => {
                        if let Some(field) = extra_field::parse_infozip_unixn(&payload) {
                            if merge.apply_unix_uid_gid(type_id) {
                                self.uid = field.uid;
                                self.gid = field.gid;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(has_pkware_field)
    }

    pub fn stat(&self) -> Stat {
        Stat {
            ino: self.ino,
            mode: self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
            blocks: self.size.div_ceil(BLOCK_SIZE),
            rdev: self.dev,
            mtime: self.mtime,
            atime: self.atime,
            ctime: self.ctime,
        }
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    /// Returns a reader over this node's content, reusing a still-live
    /// cached `BufferedReader` if one exists.
    pub fn get_reader(&self, archive: &Rc<RefCell<dyn ArchiveSource>>) -> Result<Rc<RefCell<Reader>>> {
        if let Some(weak) = self.cached_reader.borrow().as_ref() {
            if let Some(live) = weak.upgrade() {
                return Ok(live);
            }
        }

        let reader = if !self.target.is_empty() {
            Reader::String(StringReader::new(self.target.clone()))
        } else {
            let id = self.id.ok_or_else(|| Error::EntryDecode { index: 0, message: "synthesized node has no backing entry".into() })?;
            let entry = archive.borrow_mut().open_entry(id)?;
            if entry.is_seekable() {
                Reader::Unbuffered(UnbufferedReader::new(entry, self.size))
            } else {
                let archive_for_reopen = Rc::clone(archive);
                let opener: Box<dyn Fn() -> std::io::Result<Box<dyn ArchiveEntryReader>>> = Box::new(move || {
                    archive_for_reopen
                        .borrow_mut()
                        .open_entry(id)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                });
                Reader::Buffered(BufferedReader::new(entry, opener, self.size)?)
            }
        };

        let rc = Rc::new(RefCell::new(reader));
        *self.cached_reader.borrow_mut() = Some(Rc::downgrade(&rc));
        Ok(rc)
    }
}

/// Reclassifies an entry's `mode`/`is_hardlink` per the external-attributes
/// derivation rules (§4.6.1).
pub fn derive_attributes(os_made_by: u8, external_attrs: u32, name_ends_with_slash: bool) -> (u32, bool) {
    let mut opsys = os_made_by;
    let unix_mode = external_attrs >> 16;

    if opsys == OS_DOS && FileType::from_mode(unix_mode) != FileType::Unknown {
        opsys = OS_UNIX;
    }

    match opsys {
        OS_UNIX => {
            let mut mode = unix_mode;
            if name_ends_with_slash {
                mode = FileType::Directory.set_on(mode);
            } else if matches!(FileType::from_mode(mode), FileType::Directory | FileType::Unknown) {
                mode = FileType::Regular.set_on(mode);
            }
            let is_hardlink = (external_attrs & 0x800) != 0 && !name_ends_with_slash;
            (mode, is_hardlink)
        }
        OS_DOS | OS_NTFS | OS_MVS => {
            let dos_attr = external_attrs & 0xff;
            let read_only = dos_attr & 1 != 0;
            let base = 0o444 | if read_only { 0 } else { 0o220 };
            let mode = if name_ends_with_slash { FileType::Directory.set_on(base | 0o111) } else { FileType::Regular.set_on(base) };
            (mode, false)
        }
        _ => {
            let mode = if name_ends_with_slash { FileType::Directory.set_on(0o775) } else { FileType::Regular.set_on(0o664) };
            (mode, false)
        }
    }
}

pub fn compression_method_code(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::Stored => 0,
        CompressionMethod::Deflated => 8,
        CompressionMethod::Bzip2 => 12,
        CompressionMethod::Zstd => 93,
        CompressionMethod::Other(code) => code,
    }
}

pub fn encryption_is_none(method: EncryptionMethod) -> bool {
    matches!(method, EncryptionMethod::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_roundtrip() {
        for t in [FileType::Regular, FileType::Directory, FileType::Symlink, FileType::Fifo, FileType::Socket, FileType::BlockDevice, FileType::CharDevice] {
            assert_eq!(FileType::from_mode(t.set_on(0o644)), t);
        }
    }

    #[test]
    fn derive_unix_directory_forced_by_trailing_slash() {
        let (mode, is_hardlink) = derive_attributes(OS_UNIX, (0o100644u32) << 16, true);
        assert_eq!(FileType::from_mode(mode), FileType::Directory);
        assert!(!is_hardlink);
    }

    #[test]
    fn derive_unix_unknown_type_becomes_regular() {
        let (mode, _) = derive_attributes(OS_UNIX, 0u32 << 16, false);
        assert_eq!(FileType::from_mode(mode), FileType::Regular);
    }

    #[test]
    fn derive_dos_readonly_bit() {
        let (mode, _) = derive_attributes(OS_DOS, 1, false);
        assert_eq!(mode & 0o222, 0);
    }

    #[test]
    fn derive_unix_hardlink_flag() {
        let (_, is_hardlink) = derive_attributes(OS_UNIX, ((0o100644u32) << 16) | 0x800, false);
        assert!(is_hardlink);
    }
}
