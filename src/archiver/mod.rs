//! Archive format plugins.
//!
//! Each supported container format implements [`ArchiveFormat`], a stateless
//! detector that either claims a [`Source`] and returns an opened [`Archive`], or
//! reports [`Detection::NotThisFormat`] so the next format can try. A format that
//! recognises its signature but finds the rest of the container damaged claims
//! the source by returning an error; detection stops there.
//!
//! | Format | Extensions | Notes |
//! |--------|-----------|-------|
//! | ZIP | `zip`, `pk3`, `pk4` | stored, deflate, bzip2, LZMA; zip64; symlinks |
//! | 7z | `7z` | LZMA, LZMA2, PPMd, BZip2, Deflate, BCJ, Delta |
//! | GRP | `grp` | Build engine |
//! | QPAK | `pak` | Quake I/II |
//! | HOG | `hog` | Descent I (DHF) and Descent 3 (HOG2) |
//! | MVL | `mvl` | Descent II movies |
//! | WAD | `wad` | Doom |
//! | SLB | `slb` | Independence War |
//! | ISO9660 | `iso` | CD-ROM images, Joliet preferred |
//! | VDF | `vdf` | Gothic I/II |
//!
//! Native directories are mounted through [`dir::DirArchive`], the only
//! writable implementation, and are not part of the detection list.

pub mod dir;
pub mod grp;
pub mod hog;
pub mod iso9660;
pub mod mvl;
pub mod qpak;
pub mod sevenz;
pub mod slb;
pub mod unpacked;
pub mod vdf;
pub mod wad;
pub mod zip;

use crate::metadata::Metadata;
use crate::path::VirtualPath;
use crate::source::{ReadStream, Source, WriteStream};
use crate::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

/// Static description of an archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Short format name, also used in error messages (`"ZIP"`, `"WAD"`).
    pub name: &'static str,
    /// Lowercase file extensions that suggest this format, without the dot.
    pub extensions: &'static [&'static str],
    /// One-line human-readable description.
    pub description: &'static str,
    /// True if the format can store symbolic links.
    pub supports_symlinks: bool,
}

/// The outcome of offering a source to a format.
pub enum Detection {
    /// The format recognised the source and indexed it.
    Claimed(Arc<dyn Archive>),
    /// The source is not in this format; try the next one.
    NotThisFormat,
}

impl std::fmt::Debug for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claimed(archive) => f.debug_tuple("Claimed").field(&archive.format()).finish(),
            Self::NotThisFormat => f.write_str("NotThisFormat"),
        }
    }
}

/// A stateless archive format plugin.
pub trait ArchiveFormat: Send + Sync {
    /// Returns the format description.
    fn info(&self) -> &FormatInfo;

    /// Checks `source` and, if it is in this format, indexes it.
    ///
    /// Implementations duplicate `source` with [`Source::try_clone`] for their
    /// own use; `name` is only used for diagnostics.
    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection>;
}

/// An opened container.
///
/// Paths passed to every method are relative to the archive root. All
/// archives are read-only unless [`is_writable`](Self::is_writable) says
/// otherwise; the write methods default to [`Error::PermissionDenied`].
pub trait Archive: Send + Sync {
    /// Returns the format name.
    fn format(&self) -> &'static str;

    /// Returns metadata without following a final symbolic link.
    fn stat(&self, path: &VirtualPath) -> Result<Metadata>;

    /// Calls `callback` with the name of each child of `dir`.
    fn enumerate(
        &self,
        dir: &VirtualPath,
        callback: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>>;

    /// Opens a file for reading, following symbolic links.
    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ReadStream>>;

    /// Creates or truncates a file for writing.
    fn open_write(&self, path: &VirtualPath) -> Result<Box<dyn WriteStream>> {
        Err(read_only(path))
    }

    /// Opens a file for appending, creating it if needed.
    fn open_append(&self, path: &VirtualPath) -> Result<Box<dyn WriteStream>> {
        Err(read_only(path))
    }

    /// Removes a file or an empty directory.
    fn remove(&self, path: &VirtualPath) -> Result<()> {
        Err(read_only(path))
    }

    /// Creates a single directory whose parent exists.
    fn mkdir(&self, path: &VirtualPath) -> Result<()> {
        Err(read_only(path))
    }

    /// Returns true if the write methods are implemented.
    fn is_writable(&self) -> bool {
        false
    }

    /// Returns the host directory backing this archive, if any.
    fn native_path(&self) -> Option<&Path> {
        None
    }
}

fn read_only(path: &VirtualPath) -> Error {
    Error::PermissionDenied {
        path: path.as_str().to_string(),
    }
}

/// Returns every built-in format, in default detection order.
pub fn builtin_formats() -> Vec<Arc<dyn ArchiveFormat>> {
    vec![
        Arc::new(zip::ZipFormat),
        Arc::new(sevenz::SevenZFormat::default()),
        Arc::new(grp::GrpFormat),
        Arc::new(qpak::QpakFormat),
        Arc::new(hog::HogFormat),
        Arc::new(mvl::MvlFormat),
        Arc::new(wad::WadFormat),
        Arc::new(slb::SlbFormat),
        Arc::new(iso9660::IsoFormat),
        Arc::new(vdf::VdfFormat),
    ]
}

/// Reads the first `N` bytes of a fresh duplicate of `source`.
///
/// Returns `None` if the source is shorter than `N`.
pub(crate) fn read_magic<const N: usize>(source: &dyn Source) -> Result<Option<[u8; N]>> {
    let mut src = source.try_clone()?;
    if src.len()? < N as u64 {
        return Ok(None);
    }
    let mut buf = [0u8; N];
    src.seek(SeekFrom::Start(0))?;
    src.read_exact(&mut buf)?;
    Ok(Some(buf))
}

// ============================================================================
// StreamSource
// ============================================================================

/// A source over a file inside another mounted archive.
///
/// Duplicates reopen the entry, so nested archives get the same
/// one-cursor-per-handle model as top-level ones.
pub struct StreamSource {
    archive: Arc<dyn Archive>,
    path: VirtualPath,
    stream: Box<dyn ReadStream>,
}

impl StreamSource {
    /// Opens `path` inside `archive`.
    pub fn open(archive: Arc<dyn Archive>, path: VirtualPath) -> Result<Self> {
        let stream = archive.open_read(&path)?;
        Ok(Self {
            archive,
            path,
            stream,
        })
    }
}

impl Read for StreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Seek for StreamSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos)
    }
}

impl Source for StreamSource {
    fn len(&self) -> io::Result<u64> {
        Ok(self.stream.len())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Source>> {
        Ok(Box::new(Self::open(self.archive.clone(), self.path.clone())?))
    }
}
