//! Shared implementation for uncompressed, table-of-contents archives.
//!
//! GRP, HOG, MVL, QPAK, WAD, SLB, ISO9660 and VDF all store each file as a
//! contiguous byte range of the container. Their plugins only parse the table
//! and feed `(name, offset, size)` triples into an [`UnpackedArchive`], which
//! provides lookup, enumeration and reads.

use super::Archive;
use crate::dirtree::DirTree;
use crate::metadata::Metadata;
use crate::path::VirtualPath;
use crate::source::{ReadStream, SliceStream, Source};
use crate::sync::lock_or_recover;
use crate::{Error, Result};
use std::ops::ControlFlow;
use std::sync::Mutex;

/// Location of one stored file inside the container.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Span {
    pub offset: u64,
    pub size: u64,
}

/// An archive whose files are stored uncompressed at known offsets.
pub struct UnpackedArchive {
    format: &'static str,
    source: Mutex<Box<dyn Source>>,
    source_len: u64,
    tree: DirTree<Span>,
}

impl std::fmt::Debug for UnpackedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpackedArchive")
            .field("format", &self.format)
            .field("entries", &self.tree.len())
            .finish_non_exhaustive()
    }
}

impl UnpackedArchive {
    /// Creates an empty index over `source`.
    pub(crate) fn new(
        format: &'static str,
        source: Box<dyn Source>,
        case_insensitive: bool,
    ) -> Result<Self> {
        let source_len = source.len()?;
        Ok(Self {
            format,
            source: Mutex::new(source),
            source_len,
            tree: DirTree::new(case_insensitive),
        })
    }

    /// Indexes one file.
    ///
    /// Names that are not valid relative paths are skipped with a warning.
    /// Ranges past the end of the container are indexed anyway and fail only
    /// when the entry is opened.
    pub(crate) fn add_file(&mut self, name: &str, span: Span, meta: Metadata) {
        if let Err(e) = self.tree.insert_file(name, meta, span) {
            log::warn!("{}: skipping entry '{}': {}", self.format, name, e);
        }
    }

    /// Indexes an explicit directory.
    pub(crate) fn add_dir(&mut self, name: &str, meta: Metadata) {
        if let Err(e) = self.tree.insert_dir(name, meta) {
            log::warn!("{}: skipping directory '{}': {}", self.format, name, e);
        }
    }

    /// Number of indexed entries, including implicit directories.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns true if nothing was indexed.
    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }
}

impl Archive for UnpackedArchive {
    fn format(&self) -> &'static str {
        self.format
    }

    fn stat(&self, path: &VirtualPath) -> Result<Metadata> {
        self.tree.stat(path)
    }

    fn enumerate(
        &self,
        dir: &VirtualPath,
        callback: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>> {
        self.tree.enumerate(dir, callback)
    }

    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ReadStream>> {
        let (node, span) = self.tree.file(path)?;
        let end = span.offset.checked_add(span.size);
        if end.is_none_or(|end| end > self.source_len) {
            return Err(Error::corrupt(
                self.format,
                format!(
                    "entry '{}' ({} bytes at {}) extends past end of archive",
                    node.path, span.size, span.offset
                ),
            ));
        }
        let source = lock_or_recover(&self.source).try_clone()?;
        Ok(Box::new(SliceStream::new(source, span.offset, span.size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use std::io::Read;

    fn archive() -> UnpackedArchive {
        let source = MemorySource::new(b"HEADERalphabeta".to_vec());
        let mut archive = UnpackedArchive::new("TEST", Box::new(source), true).unwrap();
        archive.add_file(
            "ALPHA.TXT",
            Span { offset: 6, size: 5 },
            Metadata::file(5),
        );
        archive.add_file("sub/beta", Span { offset: 11, size: 4 }, Metadata::file(4));
        archive.add_file("broken", Span { offset: 12, size: 100 }, Metadata::file(100));
        archive.add_file("../escape", Span { offset: 0, size: 1 }, Metadata::file(1));
        archive
    }

    #[test]
    fn test_read_entries() {
        let archive = archive();
        let mut out = String::new();
        archive
            .open_read(&VirtualPath::new("alpha.txt").unwrap())
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "alpha");

        let mut out = String::new();
        archive
            .open_read(&VirtualPath::new("SUB/BETA").unwrap())
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "beta");
    }

    #[test]
    fn test_out_of_range_entry_fails_alone() {
        let archive = archive();
        let err = match archive.open_read(&VirtualPath::new("broken").unwrap()) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.is_corruption());
        assert!(archive.stat(&VirtualPath::new("alpha.txt").unwrap()).is_ok());
    }

    #[test]
    fn test_traversal_entry_skipped() {
        let archive = archive();
        // alpha.txt, sub, sub/beta, broken
        assert_eq!(archive.len(), 4);
    }

    #[test]
    fn test_is_read_only() {
        let archive = archive();
        let path = VirtualPath::new("new.txt").unwrap();
        assert!(matches!(
            archive.open_write(&path),
            Err(Error::PermissionDenied { .. })
        ));
        assert!(!archive.is_writable());
    }
}
