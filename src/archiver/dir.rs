//! Native host directories.
//!
//! [`DirArchive`] maps virtual paths onto a host directory one component at
//! a time, so a canonical [`VirtualPath`] can never name anything outside the
//! root. It is the only writable archive; the [`Vfs`](crate::Vfs) still only
//! lets writes through on the mount designated as the write directory.

use super::Archive;
use crate::metadata::{FileType, Metadata};
use crate::path::VirtualPath;
use crate::source::{FileSource, ReadStream, WriteStream};
use crate::timestamp::Timestamp;
use crate::{Error, Result};
use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// A host directory mounted as an archive.
#[derive(Debug, Clone)]
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    /// Opens `root`, which must be an existing directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = fs::metadata(&root).map_err(|e| map_io(e, &root.display().to_string()))?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory {
                path: root.display().to_string(),
            });
        }
        log::debug!("opened native directory {}", root.display());
        Ok(Self { root })
    }

    fn native(&self, path: &VirtualPath) -> PathBuf {
        path.to_native(&self.root)
    }
}

impl Archive for DirArchive {
    fn format(&self) -> &'static str {
        "DIR"
    }

    fn stat(&self, path: &VirtualPath) -> Result<Metadata> {
        let native = self.native(path);
        let meta = fs::symlink_metadata(&native).map_err(|e| map_io(e, path.as_str()))?;
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileType::Symlink
        } else if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_file() {
            FileType::File
        } else {
            FileType::Other
        };
        let mut out = match kind {
            FileType::Directory => Metadata::directory(),
            FileType::Symlink => Metadata::symlink(meta.len()),
            _ => Metadata::file(meta.len()),
        };
        out.file_type = kind;
        Ok(out
            .with_modified(Timestamp::from_file_time(FileTime::from_last_modification_time(&meta)))
            .with_accessed(Timestamp::from_file_time(FileTime::from_last_access_time(&meta)))
            .with_created(FileTime::from_creation_time(&meta).and_then(Timestamp::from_file_time))
            .with_read_only(meta.permissions().readonly()))
    }

    fn enumerate(
        &self,
        dir: &VirtualPath,
        callback: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>> {
        let native = self.native(dir);
        let entries = fs::read_dir(&native).map_err(|e| map_io(e, dir.as_str()))?;
        for entry in entries {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    log::warn!("skipping non-UTF-8 name {:?} in {}", raw, native.display());
                    continue;
                }
            };
            // Names like `a:b` or `a\b` cannot be spelled as a virtual path.
            if VirtualPath::new(&name).ok().is_none_or(|p| p.as_str() != name) {
                log::warn!("skipping unrepresentable name {:?} in {}", name, native.display());
                continue;
            }
            if callback(&name).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ReadStream>> {
        let native = self.native(path);
        let meta = fs::metadata(&native).map_err(|e| map_io(e, path.as_str()))?;
        if meta.is_dir() {
            return Err(Error::NotAFile {
                path: path.as_str().to_string(),
            });
        }
        let file = FileSource::open(&native).map_err(|e| map_io(e, path.as_str()))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, path: &VirtualPath) -> Result<Box<dyn WriteStream>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.native(path))
            .map_err(|e| map_io(e, path.as_str()))?;
        Ok(Box::new(file))
    }

    fn open_append(&self, path: &VirtualPath) -> Result<Box<dyn WriteStream>> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.native(path))
            .map_err(|e| map_io(e, path.as_str()))?;
        Ok(Box::new(file))
    }

    fn remove(&self, path: &VirtualPath) -> Result<()> {
        if path.is_root() {
            return Err(Error::PermissionDenied {
                path: String::new(),
            });
        }
        let native = self.native(path);
        let meta = fs::symlink_metadata(&native).map_err(|e| map_io(e, path.as_str()))?;
        if meta.is_dir() {
            fs::remove_dir(&native)
        } else {
            fs::remove_file(&native)
        }
        .map_err(|e| map_io(e, path.as_str()))
    }

    fn mkdir(&self, path: &VirtualPath) -> Result<()> {
        let native = self.native(path);
        match fs::create_dir(&native) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && native.is_dir() => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::NotADirectory {
                path: path.as_str().to_string(),
            }),
            Err(e) => Err(map_io(e, path.as_str())),
        }
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn native_path(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Translates host errors into the matching virtual filesystem errors.
fn map_io(err: io::Error, path: &str) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound {
            path: path.to_string(),
        },
        io::ErrorKind::PermissionDenied => Error::PermissionDenied {
            path: path.to_string(),
        },
        io::ErrorKind::DirectoryNotEmpty => Error::DirectoryNotEmpty {
            path: path.to_string(),
        },
        io::ErrorKind::NotADirectory => Error::NotADirectory {
            path: path.to_string(),
        },
        io::ErrorKind::IsADirectory => Error::NotAFile {
            path: path.to_string(),
        },
        _ => Error::Io(err),
    }
}
