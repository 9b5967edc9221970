//! The seam between this crate and the underlying ZIP library. Everything the
//! tree builder and the readers need from an opened archive is captured by
//! [`ArchiveSource`]; [`ZipArchiveSource`] implements it on top of the `zip` crate.
//!
//! No ZIP-format parsing happens in this crate outside of this module: central
//! directory enumeration, extra-field byte access, and decompression streams
//! are all delegated to `zip`.

use std::io::Read;

use crate::error::{Error, Result};
use crate::extra_field::ExtraFieldLocation;

/// Compression methods this crate might encounter. Mirrors the subset of
/// `zip::CompressionMethod` relevant to support checks; exhaustive matching is
/// not required since unknown methods are rejected by default.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Bzip2,
    Zstd,
    Other(u16),
}

impl From<zip::CompressionMethod> for CompressionMethod {
    fn from(m: zip::CompressionMethod) -> Self {
        match m {
            zip::CompressionMethod::Stored => CompressionMethod::Stored,
            zip::CompressionMethod::Deflated => CompressionMethod::Deflated,
            zip::CompressionMethod::Bzip2 => CompressionMethod::Bzip2,
            zip::CompressionMethod::Zstd => CompressionMethod::Zstd,
            other => CompressionMethod::Other(other.to_owned().into()),
        }
    }
}

/// Encryption methods this crate might encounter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncryptionMethod {
    None,
    ZipCrypto,
    Aes,
    Other,
}

/// The subset of a ZIP entry's stat record this crate needs.
#[derive(Debug, Clone)]
pub struct EntryStat {
    pub name: Vec<u8>,
    pub is_dir: bool,
    pub size: u64,
    pub mtime_unix: i64,
    pub compression: CompressionMethod,
    pub encryption: EncryptionMethod,
}

/// Everything the tree builder and readers need from an opened ZIP archive.
///
/// Metadata accessors take `&mut self` because the `zip` crate itself needs
/// mutable access to its reader to walk an entry's headers.
pub trait ArchiveSource {
    fn num_entries(&self) -> u64;
    fn raw_name(&self, id: u64) -> Option<Vec<u8>>;
    fn stat(&mut self, id: u64) -> Result<EntryStat>;
    /// `(os_made_by, external_attributes)`.
    fn external_attributes(&mut self, id: u64) -> Result<(u8, u32)>;
    /// Raw `(type_id, payload)` pairs for one entry's extra field, from
    /// either the central directory or the local header copy (the two can
    /// differ; see `ZipArchiveSource::extra_fields` for what's actually
    /// retrievable through the underlying library).
    fn extra_fields(&mut self, id: u64, location: ExtraFieldLocation) -> Result<Vec<(u16, Vec<u8>)>>;
    fn encryption_supported(&self, method: EncryptionMethod) -> bool;
    fn compression_supported(&self, method: CompressionMethod) -> bool;
    fn open_entry(&mut self, id: u64) -> Result<Box<dyn ArchiveEntryReader>>;
    fn set_default_password(&mut self, password: String);
}

/// A single open entry's byte stream: `Read` plus an opt-in seek for stored entries.
pub trait ArchiveEntryReader: Read {
    fn is_seekable(&self) -> bool;
    fn seek_to(&mut self, offset: u64) -> std::io::Result<()>;
}

/// OS-made-by byte values, per the ZIP APPNOTE "version made by" field.
pub const OS_UNIX: u8 = 3;
pub const OS_DOS: u8 = 0;
pub const OS_NTFS: u8 = 11;
pub const OS_MVS: u8 = 1;

/// `ZipArchiveSource<R>` backs [`ArchiveSource`] with `zip::ZipArchive<R>`.
pub struct ZipArchiveSource<R> {
    archive: zip::ZipArchive<R>,
    password: Option<String>,
}

impl<R: Read + std::io::Seek> ZipArchiveSource<R> {
    pub fn open(reader: R) -> Result<Self> {
        let archive = zip::ZipArchive::new(reader).map_err(|e| {
            let code = zip_error_code(&e);
            Error::ArchiveOpen { code, message: e.to_string() }
        })?;
        Ok(ZipArchiveSource { archive, password: None })
    }

    fn with_file<T>(&mut self, id: u64, f: impl FnOnce(&zip::read::ZipFile) -> T) -> Result<T> {
        let file = self.archive.by_index_raw(id as usize).map_err(|e| Error::EntryDecode { index: id, message: e.to_string() })?;
        Ok(f(&file))
    }
}

impl<R: Read + std::io::Seek> ArchiveSource for ZipArchiveSource<R> {
    fn num_entries(&self) -> u64 {
        self.archive.len() as u64
    }

    fn raw_name(&self, id: u64) -> Option<Vec<u8>> {
        self.archive.name_for_index(id as usize).map(|s| s.as_bytes().to_vec())
    }

    fn stat(&mut self, id: u64) -> Result<EntryStat> {
        self.with_file(id, |file| EntryStat {
            name: file.name_raw().to_vec(),
            is_dir: file.is_dir(),
            size: file.size(),
            mtime_unix: file
                .last_modified()
                .and_then(|dt| dt.to_time().ok())
                .map(|t| t.unix_timestamp())
                .unwrap_or(0),
            compression: file.compression().into(),
            encryption: if file.encrypted() { EncryptionMethod::ZipCrypto } else { EncryptionMethod::None },
        })
    }

    fn external_attributes(&mut self, id: u64) -> Result<(u8, u32)> {
        self.with_file(id, |file| (file.version_made_by().0, file.unix_mode().map(|m| m << 16).unwrap_or(file.external_attributes())))
    }

    fn extra_fields(&mut self, id: u64, location: ExtraFieldLocation) -> Result<Vec<(u16, Vec<u8>)>> {
        match location {
            // `zip` only ever exposes the central directory's copy of an
            // entry's extra field through its safe reader API; the local
            // header's copy is parsed solely for data-offset arithmetic and
            // discarded, never surfaced. So the local-header pass below sees
            // nothing rather than a duplicate of the central bytes.
            ExtraFieldLocation::CentralDirectory => self.with_file(id, |file| parse_extra_field_records(file.extra_data())),
            ExtraFieldLocation::LocalHeader => Ok(Vec::new()),
        }
    }

    fn encryption_supported(&self, method: EncryptionMethod) -> bool {
        matches!(method, EncryptionMethod::None | EncryptionMethod::ZipCrypto | EncryptionMethod::Aes)
    }

    fn compression_supported(&self, method: CompressionMethod) -> bool {
        matches!(method, CompressionMethod::Stored | CompressionMethod::Deflated | CompressionMethod::Bzip2 | CompressionMethod::Zstd)
    }

    fn open_entry(&mut self, id: u64) -> Result<Box<dyn ArchiveEntryReader>> {
        let bytes = if let Some(password) = self.password.clone() {
            let mut file = self
                .archive
                .by_index_decrypt(id as usize, password.as_bytes())
                .map_err(|e| Error::EntryDecode { index: id, message: e.to_string() })?;
            read_all(&mut file)?
        } else {
            let mut file = self.archive.by_index(id as usize).map_err(|e| Error::EntryDecode { index: id, message: e.to_string() })?;
            read_all(&mut file)?
        };
        Ok(Box::new(OwnedZipEntry { bytes, pos: 0 }))
    }

    fn set_default_password(&mut self, password: String) {
        self.password = Some(password);
    }
}

/// Assigns a small stable code to a `zip::result::ZipError`, for the
/// `10 + code` exit-code contract a mounting front end is expected to honor.
/// The original's libzip-backed `ZipError::code()` carries a true numeric
/// error code straight from the C library; `zip` has no such field, so each
/// variant gets its own fixed number instead.
fn zip_error_code(e: &zip::result::ZipError) -> i32 {
    match e {
        zip::result::ZipError::Io(_) => 1,
        zip::result::ZipError::InvalidArchive(_) => 2,
        zip::result::ZipError::UnsupportedArchive(_) => 3,
        zip::result::ZipError::FileNotFound(_) => 4,
        zip::result::ZipError::InvalidPassword { .. } => 5,
        _ => 9,
    }
}

/// Splits a raw extra-field byte blob into `(type_id, payload)` records, per
/// the ZIP APPNOTE's `(id: u16, size: u16, data)` repeating layout.
fn parse_extra_field_records(bytes: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= bytes.len() {
        let id = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
        let size = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 4;
        if pos + size > bytes.len() {
            break;
        }
        out.push((id, bytes[pos..pos + size].to_vec()));
        pos += size;
    }
    out
}

fn read_all(mut r: impl Read) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Wraps fully-decompressed entry bytes.
///
/// The `zip` crate's `ZipFile<'a>` streaming reader borrows its parent
/// `ZipArchive`, which conflicts with this crate's need to hold an entry
/// reader that outlives further archive access (in particular, a
/// `BufferedReader` rewind must be able to reopen a fresh stream for one
/// entry while other entries may still be open elsewhere). Decompressing
/// eagerly into an owned buffer sidesteps that borrow at the cost of holding
/// one entry's uncompressed bytes in memory at a time; `BufferedReader`'s
/// rolling-buffer and rewind logic still runs exactly as specified against
/// this owned, forward-only `Read` source.
struct OwnedZipEntry {
    bytes: Vec<u8>,
    pos: usize,
}

impl Read for OwnedZipEntry {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.bytes.len() - self.pos);
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl ArchiveEntryReader for OwnedZipEntry {
    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_to(&mut self, _offset: u64) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "owned entry reader is forward-only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_back_to_back_extra_records() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x5455u16.to_le_bytes());
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4, 5]);
        bytes.extend_from_slice(&0x7855u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&[9, 9, 9, 9]);

        let records = parse_extra_field_records(&bytes);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, 0x5455);
        assert_eq!(records[1].0, 0x7855);
    }

    #[test]
    fn truncated_trailing_record_is_dropped() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x5455u16.to_le_bytes());
        bytes.extend_from_slice(&100u16.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(parse_extra_field_records(&bytes).is_empty());
    }
}
