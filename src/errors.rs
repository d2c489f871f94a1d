//! Error taxonomy for Android Backup processing.
//!
//! Every failure is categorical and carries a human-readable description.
//! Operations elaborate these with `anyhow` context as they propagate; the
//! CLI prints the chain and exits with status 1. Nothing is retried and
//! partial outputs are left on disk for inspection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A referenced input file does not exist.
    #[error("file `{0}` does not exist")]
    InputMissing(PathBuf),

    /// An output path already exists; outputs are opened with exclusive
    /// create and are never silently overwritten.
    #[error("file `{0}` already exists")]
    OutputExists(PathBuf),

    /// The input is not an Android Backup file at all.
    #[error("not an Android Backup file")]
    BadMagic,

    /// An Android Backup header line could not be parsed.
    #[error("unable to parse header field `{0}`")]
    BadHeader(&'static str),

    #[error("unsupported Android Backup version: {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported Android Backup compression: {0}")]
    UnsupportedCompression(i64),

    #[error("unsupported Android Backup encryption: {0}")]
    UnsupportedEncryption(String),

    /// Encryption was requested but no passphrase could be resolved.
    #[error("no passphrase given")]
    PassphraseMissing,

    /// Any failure while decrypting, deliberately uniform so callers can
    /// not distinguish a cipher error from a padding error.
    #[error("failed to decrypt, wrong passphrase?")]
    DecryptionFailed,

    /// The master-key checksum did not match under either the mangled or
    /// the raw key.
    #[error("bad Android Backup checksum, wrong passphrase?")]
    BadChecksum,

    #[error("invalid TAR data: {0}")]
    TarParse(String),

    /// `merge` saw an input whose version differs from the first one.
    #[error("can't merge `{file}`: it has version {found}, but we are merging into version {expected}")]
    VersionMismatch {
        file: PathBuf,
        found: u32,
        expected: u32,
    },

    /// The host environment cancelled the operation.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn tar(msg: impl Into<String>) -> Self {
        Self::TarParse(msg.into())
    }
}
