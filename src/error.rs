//! Defines the error type returned by the archive projection core.

use std::fmt;

/// Result of archive projection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or querying a projected archive tree.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The archive could not be opened or its central directory could not be read.
    #[error("cannot open archive: {message} (code {code})")]
    ArchiveOpen {
        /// Underlying ZIP library error code, if one was reported.
        code: i32,
        message: String,
    },

    /// A single entry's stat or extra-field data was malformed.
    #[error("entry {index} could not be decoded: {message}")]
    EntryDecode { index: u64, message: String },

    /// A raw entry name failed path normalization.
    #[error("entry {index} has an invalid path: {message}")]
    BadPath { index: u64, message: String },

    /// The archive uses a compression method this crate cannot decode.
    #[error("entry {index} uses unsupported compression method {method}")]
    UnsupportedCompression { index: u64, method: u16 },

    /// The archive uses an encryption method this crate cannot decode.
    #[error("entry {index} uses unsupported encryption method")]
    UnsupportedEncryption { index: u64 },

    /// Password verification failed after prompting.
    #[error("incorrect password")]
    PasswordMismatch,

    /// A buffer allocation could not be satisfied even at the minimum floor size.
    #[error("out of memory")]
    OutOfMemory,

    /// A read or seek on a decompression stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// A small stable code for the ZIP-layer errors, used to build the
    /// `10 + code` exit-code contract of a mounting front end. `None` for
    /// errors that aren't ZIP-layer failures (generic I/O, allocation).
    ///
    /// The underlying `zip` crate has no numeric error codes of its own (the
    /// `libzip`-backed original assigned `e.code()` directly), so each
    /// variant here gets its own fixed small code instead.
    pub fn zip_error_code(&self) -> Option<i32> {
        match self {
            Error::ArchiveOpen { code, .. } => Some(*code),
            Error::EntryDecode { .. } => Some(1),
            Error::BadPath { .. } => Some(2),
            Error::UnsupportedCompression { .. } => Some(3),
            Error::UnsupportedEncryption { .. } => Some(4),
            Error::PasswordMismatch => Some(5),
            Error::OutOfMemory | Error::Io(_) => None,
        }
    }
}

/// POSIX errno-shaped codes returned across the [`crate::query::FilesystemOps`] boundary.
///
/// Kept separate from [`Error`] because one archive error can map to different
/// errno values depending on which operation raised it (for instance `BadPath`
/// is `ENOENT` at `getattr` but `EINVAL` at `readlink`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Errno {
    NoEnt,
    IsDir,
    NotDir,
    Inval,
    Io,
    NoMem,
    NoSys,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Errno::NoEnt => "ENOENT",
            Errno::IsDir => "EISDIR",
            Errno::NotDir => "ENOTDIR",
            Errno::Inval => "EINVAL",
            Errno::Io => "EIO",
            Errno::NoMem => "ENOMEM",
            Errno::NoSys => "ENOSYS",
        };
        f.write_str(name)
    }
}

impl From<&Error> for Errno {
    fn from(err: &Error) -> Self {
        match err {
            Error::ArchiveOpen { .. } => Errno::Io,
            Error::EntryDecode { .. } | Error::BadPath { .. } => Errno::NoEnt,
            Error::UnsupportedCompression { .. } | Error::UnsupportedEncryption { .. } => Errno::Inval,
            Error::PasswordMismatch => Errno::Inval,
            Error::OutOfMemory => Errno::NoMem,
            Error::Io(_) => Errno::Io,
        }
    }
}
