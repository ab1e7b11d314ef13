//! Error taxonomy for parkit-core.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hash::hex;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Structural packet/volume errors: fatal to the record being read.
    #[error("unexpected magic string")]
    BadMagic,

    #[error("invalid packet length {0}")]
    BadLength(u64),

    #[error("short read: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },

    #[error("hash mismatch: expected {}, got {}", hex(.expected), hex(.actual))]
    HashMismatch { expected: [u8; 16], actual: [u8; 16] },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    // Arithmetic layer invariant violations.
    #[error("division by zero in Galois field")]
    DivisionByZero,

    #[error("matrix is singular")]
    SingularMatrix,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Recovery set model.
    #[error("invalid block size {0}")]
    InvalidBlockSize(usize),

    #[error("inconsistent block size: set uses {expected}, got {actual}")]
    InconsistentBlockSize { expected: usize, actual: usize },

    #[error("duplicate file name {0:?} in recovery set")]
    DuplicateFileName(String),

    #[error("too many data blocks: {count} (max {max})")]
    TooManyBlocks { count: usize, max: usize },

    #[error("too many parity volumes: {count} (max {max})")]
    TooManyParityVolumes { count: usize, max: usize },

    #[error("allocation too large: {block_count} blocks of {block_size} bytes")]
    AllocationTooLarge { block_size: usize, block_count: usize },

    #[error("no input files")]
    NoInputFiles,

    #[error("{} is outside {}, the parity file directory", .path.display(), .dir.display())]
    OutsideArchiveDir { path: PathBuf, dir: PathBuf },

    // Decoder.
    #[error("unsupported parity file {0:?} (expected .par or .par2)")]
    UnsupportedFormat(PathBuf),

    #[error("no recovery set found in {0:?}")]
    NoRecoverySet(PathBuf),

    #[error("main packet lists file id {0} without a file description")]
    MissingFileDescription(String),

    #[error("refusing unsafe file name {0:?}")]
    UnsafeFileName(String),

    #[error("{0} has not been loaded yet")]
    NotLoaded(&'static str),

    // Repair.
    #[error(
        "insufficient redundancy: {needed} blocks to recover, {available} usable parity blocks \
         ({} more needed)",
        shortfall(.needed, .available)
    )]
    InsufficientRedundancy { needed: usize, available: usize },

    #[error("repair verification failed: {0}")]
    RepairVerificationFailed(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn shortfall(needed: &usize, available: &usize) -> usize {
    needed.saturating_sub(*available)
}

impl Error {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| Error::Io { path: path.to_path_buf(), source }
    }

    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Error {
        Error::Malformed { what, detail: detail.into() }
    }

    /// True for I/O errors caused by a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
