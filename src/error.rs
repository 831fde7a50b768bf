//! Error types for virtual filesystem operations.
//!
//! This module provides the [`Error`] enum which represents every failure
//! mode of mounting, resolving, reading and writing through a [`Vfs`], along
//! with a convenient [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. Errors
//! are always returned to the caller: a malformed archive never aborts the
//! process, and a corrupt entry only fails the operation that touched it.
//!
//! ```rust,no_run
//! use packfs::{Error, Vfs};
//!
//! fn load_level(vfs: &Vfs, name: &str) -> packfs::Result<Vec<u8>> {
//!     match vfs.read_to_vec(name) {
//!         Ok(bytes) => Ok(bytes),
//!         Err(Error::NotFound { path }) => {
//!             eprintln!("level {} is not in any mounted archive", path);
//!             Err(Error::NotFound { path })
//!         }
//!         Err(e @ Error::PathTraversalRejected { .. }) => {
//!             eprintln!("refusing suspicious path");
//!             Err(e)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```
//!
//! [`Vfs`]: crate::Vfs

use std::io;

/// The main error type for virtual filesystem operations.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | Mounting | [`UnsupportedFormat`][Self::UnsupportedFormat], [`NotMounted`][Self::NotMounted] | Unknown container, bad unmount |
/// | Lookup | [`NotFound`][Self::NotFound], [`NotAFile`][Self::NotAFile], [`NotADirectory`][Self::NotADirectory] | Missing or wrong-typed entry |
/// | Security | [`PathTraversalRejected`][Self::PathTraversalRejected], [`SymlinkForbidden`][Self::SymlinkForbidden], [`InvalidPath`][Self::InvalidPath] | Hostile or malformed paths |
/// | Writing | [`PermissionDenied`][Self::PermissionDenied], [`NoWriteDir`][Self::NoWriteDir], [`Busy`][Self::Busy], [`DirectoryNotEmpty`][Self::DirectoryNotEmpty] | Read-only mounts |
/// | Handles | [`HandleInvalidated`][Self::HandleInvalidated], [`HandleClosed`][Self::HandleClosed], [`InvalidOffset`][Self::InvalidOffset], [`Eof`][Self::Eof] | Cursor and lifetime errors |
/// | Archive data | [`CorruptArchive`][Self::CorruptArchive], [`UnsupportedMethod`][Self::UnsupportedMethod], [`CrcMismatch`][Self::CrcMismatch] | Damaged containers |
/// | I/O | [`Io`][Self::Io] | Host filesystem |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the host filesystem or a byte source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No registered archive format accepted the source.
    ///
    /// Every plugin was tried and each one reported that the source is not
    /// in its format.
    #[error("Unsupported archive format: {source_name}")]
    UnsupportedFormat {
        /// The name of the source that could not be mounted.
        source_name: String,
    },

    /// A plugin recognised the container but its contents are damaged.
    ///
    /// Returned at mount time when the index cannot be built, or at read time
    /// when a single entry's data is unusable. Other entries stay readable.
    #[error("Corrupt {format} archive: {reason}")]
    CorruptArchive {
        /// The format name of the plugin that detected the damage.
        format: &'static str,
        /// A description of the damage.
        reason: String,
    },

    /// An entry is stored with a compression method this build cannot decode.
    #[error("Unsupported {format} compression method: {method:#x}")]
    UnsupportedMethod {
        /// The format name of the plugin.
        format: &'static str,
        /// The format-specific method identifier.
        method: u64,
    },

    /// The decompressed data of an entry did not match its stored checksum.
    #[error("CRC mismatch for '{path}': expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// The archive-relative path of the entry.
        path: String,
        /// The checksum recorded in the archive.
        expected: u32,
        /// The checksum of the data actually read.
        actual: u32,
    },

    /// No mount provides the requested path.
    #[error("Not found: {path}")]
    NotFound {
        /// The canonical virtual path that was looked up.
        path: String,
    },

    /// The source passed to `unmount` (or a related query) is not mounted.
    #[error("Not mounted: {source_name}")]
    NotMounted {
        /// The source name that was looked up.
        source_name: String,
    },

    /// A write was attempted on a read-only mount or read-only format.
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// The virtual path of the attempted write.
        path: String,
    },

    /// A write was attempted but no write directory has been designated.
    #[error("No write directory is set")]
    NoWriteDir,

    /// The write directory cannot change while files opened for writing exist.
    #[error("Write directory is busy: {open_files} file(s) still open for writing")]
    Busy {
        /// Number of write handles still open.
        open_files: usize,
    },

    /// A seek targeted a position outside the valid range of the handle.
    #[error("Invalid offset {offset} (length {length})")]
    InvalidOffset {
        /// The requested position.
        offset: u64,
        /// The length of the file at the time of the seek.
        length: u64,
    },

    /// A read was attempted with the cursor already at the end of the file.
    #[error("End of file")]
    Eof,

    /// The archive backing this handle was unmounted.
    #[error("File handle invalidated: '{source_name}' was unmounted")]
    HandleInvalidated {
        /// The source the handle was opened from.
        source_name: String,
    },

    /// The handle was already closed.
    #[error("File handle is closed")]
    HandleClosed,

    /// The path tried to climb above the virtual root.
    ///
    /// This is a **security error**: inputs like `../../etc/passwd` are
    /// rejected before any mount is consulted.
    #[error("Path traversal rejected: {path}")]
    PathTraversalRejected {
        /// The path as supplied by the caller.
        path: String,
    },

    /// The path is syntactically invalid (NUL bytes, drive or stream syntax).
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// The path as supplied by the caller.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Resolution crossed a symbolic link while symlinks are not permitted.
    #[error("Symbolic link forbidden: {path}")]
    SymlinkForbidden {
        /// The virtual path of the link.
        path: String,
    },

    /// The path names a directory where a file was required.
    #[error("Not a file: {path}")]
    NotAFile {
        /// The virtual path.
        path: String,
    },

    /// The path names a file where a directory was required.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// The virtual path.
        path: String,
    },

    /// `delete` was called on a directory that still has children.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The virtual path.
        path: String,
    },
}

impl Error {
    /// Shorthand for a [`CorruptArchive`][Self::CorruptArchive] error.
    pub(crate) fn corrupt(format: &'static str, reason: impl Into<String>) -> Self {
        Self::CorruptArchive {
            format,
            reason: reason.into(),
        }
    }

    /// Unwraps an [`Error`] that travelled through `std::io` as the inner
    /// error of an `io::Error`, or wraps the I/O error as-is.
    pub(crate) fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
            None => Self::Io(io::Error::from(kind)),
        }
    }

    /// Returns true if this error reports missing data rather than a failure.
    ///
    /// Resolution treats these as "try the next mount".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
            || matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// Returns true if this error indicates damaged archive data.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptArchive { .. } | Self::CrcMismatch { .. }
        ) || matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::InvalidData)
    }

    /// Returns true for errors caused by the caller's path rather than the data.
    pub fn is_path_error(&self) -> bool {
        matches!(
            self,
            Self::PathTraversalRejected { .. }
                | Self::InvalidPath { .. }
                | Self::SymlinkForbidden { .. }
        )
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(e) => e.kind(),
            Error::NotFound { .. } | Error::NotMounted { .. } => io::ErrorKind::NotFound,
            Error::PermissionDenied { .. }
            | Error::NoWriteDir
            | Error::SymlinkForbidden { .. }
            | Error::PathTraversalRejected { .. } => io::ErrorKind::PermissionDenied,
            Error::InvalidOffset { .. } | Error::InvalidPath { .. } => {
                io::ErrorKind::InvalidInput
            }
            Error::Eof => io::ErrorKind::UnexpectedEof,
            Error::CorruptArchive { .. } | Error::CrcMismatch { .. } => {
                io::ErrorKind::InvalidData
            }
            _ => io::ErrorKind::Other,
        };
        match err {
            Error::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

/// A specialized Result type for virtual filesystem operations.
pub type Result<T> = std::result::Result<T, Error>;
