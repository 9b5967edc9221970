//! Build-time options for projecting an archive, and the CLI surface that
//! maps onto them.

use serde::{Deserialize, Serialize};

/// How entry names should be interpreted before path normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncodingOption {
    /// Detect the encoding from a sample of entry names, restricted to a
    /// known candidate set; fall back to treating names as already UTF-8.
    Auto,
    /// Use the archive's own "is UTF-8" guess; don't transcode.
    Libzip,
    /// Don't transcode at all; treat raw bytes as UTF-8, lossily.
    Raw,
    /// Assume a specific named encoding (an `encoding_rs` label, e.g. `"shift_jis"`).
    Named(String),
}

impl Default for EncodingOption {
    fn default() -> Self {
        EncodingOption::Auto
    }
}

/// Options controlling how the tree builder (§4.6) projects an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub encoding: EncodingOption,
    pub include_symlinks: bool,
    pub include_hardlinks: bool,
    pub include_special_files: bool,
    /// Treat an incorrect password as a fatal mount error rather than a log line.
    pub check_password: bool,
    /// Treat unsupported compression/encryption as a fatal mount error.
    pub check_compression: bool,
    /// Don't print to stderr / suppress progress logging.
    pub quiet: bool,
    /// Strip paths from log lines (for sharing logs without leaking archive contents).
    pub redact: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            encoding: EncodingOption::Auto,
            include_symlinks: true,
            include_hardlinks: true,
            include_special_files: true,
            check_password: true,
            check_compression: true,
            quiet: false,
            redact: false,
        }
    }
}

/// CLI flags, mapped onto [`Options`] by `From<Cli> for Options`. The binary
/// in `demos/mount_zip.rs` is the only consumer; the FUSE mount loop itself
/// is out of scope for this crate.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "mount-zip", about = "Project a ZIP archive as a read-only filesystem tree")]
pub struct Cli {
    /// Path to the ZIP archive.
    pub archive: std::path::PathBuf,

    /// Optional mount point; informational only for this demo binary.
    pub mount_point: Option<std::path::PathBuf>,

    #[arg(short, long)]
    pub quiet: bool,

    #[arg(short, long)]
    pub verbose: bool,

    /// Strip paths from log output.
    #[arg(long)]
    pub redact: bool,

    /// Treat password/compression mismatches as warnings instead of fatal errors.
    #[arg(long)]
    pub force: bool,

    #[arg(long, value_name = "name|auto|raw|libzip")]
    pub encoding: Option<String>,

    #[arg(long)]
    pub no_specials: bool,

    #[arg(long)]
    pub no_symlinks: bool,

    #[arg(long)]
    pub no_hardlinks: bool,

    /// Accepted and parsed for compatibility; this crate never caches decompressed content.
    #[arg(long, value_name = "dir")]
    pub cache: Option<std::path::PathBuf>,

    /// Accepted and parsed for compatibility; this crate never caches decompressed content.
    #[arg(long)]
    pub nocache: bool,
}

impl From<&Cli> for Options {
    fn from(cli: &Cli) -> Self {
        let encoding = match cli.encoding.as_deref() {
            None | Some("auto") => EncodingOption::Auto,
            Some("raw") => EncodingOption::Raw,
            Some("libzip") => EncodingOption::Libzip,
            Some(name) => EncodingOption::Named(name.to_string()),
        };
        Options {
            encoding,
            include_symlinks: !cli.no_symlinks,
            include_hardlinks: !cli.no_hardlinks,
            include_special_files: !cli.no_specials,
            check_password: !cli.force,
            check_compression: !cli.force,
            quiet: cli.quiet,
            redact: cli.redact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_everything() {
        let o = Options::default();
        assert!(o.include_symlinks && o.include_hardlinks && o.include_special_files);
        assert!(o.check_password && o.check_compression);
    }

    #[test]
    fn toml_roundtrip() {
        let o = Options { encoding: EncodingOption::Named("koi8-r".into()), ..Options::default() };
        let s = toml::to_string(&o).unwrap();
        let back: Options = toml::from_str(&s).unwrap();
        assert_eq!(back.encoding, EncodingOption::Named("koi8-r".into()));
    }
}
