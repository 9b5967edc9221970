//! Projects a ZIP archive's central directory as a read-only POSIX
//! filesystem tree: synthesizes missing intermediate directories, decodes
//! Unix metadata from extra fields, and serves random-access reads over
//! forward-only decompression streams.
//!
//! This crate stops at the filesystem model: wiring it into an actual
//! mount point (FUSE or otherwise) is left to an embedder, via
//! [`query::FilesystemOps`].

pub mod archive;
pub mod config;
pub mod data_node;
pub mod error;
pub mod extra_field;
pub mod file_node;
pub mod path;
pub mod query;
pub mod reader;
pub mod tree;

pub use archive::{ArchiveSource, ZipArchiveSource};
pub use config::{Cli, Options};
pub use error::{Errno, Error, Result};
pub use query::FilesystemOps;
pub use tree::Tree;
