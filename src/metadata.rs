//! Entry metadata returned by `stat`.

use crate::timestamp::Timestamp;
use std::time::SystemTime;

/// The kind of an entry in the virtual filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// A regular file with readable content.
    File,
    /// A directory, either real or implied by a deeper path.
    Directory,
    /// A symbolic link.
    ///
    /// Links are only followed when the [`Vfs`](crate::Vfs) permits them.
    Symlink,
    /// Anything else the host reports (sockets, devices, ...).
    Other,
}

impl FileType {
    /// Short lowercase label, used by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }
}

/// Metadata for a single entry.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Metadata {
    /// The entry kind.
    pub file_type: FileType,
    /// Uncompressed size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, if the format records one.
    pub modified: Option<Timestamp>,
    /// Creation time, if the format records one.
    pub created: Option<Timestamp>,
    /// Last access time, if the format records one.
    pub accessed: Option<Timestamp>,
    /// True if the entry cannot be written through its mount.
    pub read_only: bool,
}

impl Metadata {
    /// Metadata for a read-only file of `size` bytes with no timestamps.
    pub fn file(size: u64) -> Self {
        Self {
            file_type: FileType::File,
            size,
            modified: None,
            created: None,
            accessed: None,
            read_only: true,
        }
    }

    /// Metadata for a read-only directory with no timestamps.
    pub fn directory() -> Self {
        Self {
            file_type: FileType::Directory,
            ..Self::file(0)
        }
    }

    /// Metadata for a read-only symbolic link whose target is `size` bytes long.
    pub fn symlink(size: u64) -> Self {
        Self {
            file_type: FileType::Symlink,
            ..Self::file(size)
        }
    }

    /// Sets the modification time.
    pub fn with_modified(mut self, modified: Option<Timestamp>) -> Self {
        self.modified = modified;
        self
    }

    /// Sets the creation time.
    pub fn with_created(mut self, created: Option<Timestamp>) -> Self {
        self.created = created;
        self
    }

    /// Sets the access time.
    pub fn with_accessed(mut self, accessed: Option<Timestamp>) -> Self {
        self.accessed = accessed;
        self
    }

    /// Sets the read-only flag.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    /// Returns the modification time as a `SystemTime`.
    pub fn modified_time(&self) -> Option<SystemTime> {
        self.modified.map(|ts| ts.as_system_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let meta = Metadata::file(42);
        assert!(meta.is_file());
        assert_eq!(meta.size, 42);
        assert!(meta.read_only);

        let meta = Metadata::directory();
        assert!(meta.is_dir());
        assert_eq!(meta.size, 0);

        assert!(Metadata::symlink(3).is_symlink());
    }

    #[test]
    fn test_builder() {
        let ts = Timestamp::from_unix_secs(100).unwrap();
        let meta = Metadata::file(1).with_modified(Some(ts)).with_read_only(false);
        assert_eq!(meta.modified, Some(ts));
        assert!(!meta.read_only);
        assert_eq!(meta.modified_time(), Some(ts.as_system_time()));
    }

    #[test]
    fn test_file_type_labels() {
        assert_eq!(FileType::Directory.as_str(), "directory");
        assert_eq!(FileType::Symlink.as_str(), "symlink");
    }
}
