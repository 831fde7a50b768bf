//! The virtual filesystem context.
//!
//! A [`Vfs`] owns the search path, the format registry and the write target.
//! Paths are looked up in the mounts in precedence order; the first mount
//! that has an entry for a path wins and hides the same path in every mount
//! behind it. Directory listings merge all mounts.
//!
//! ```rust,ignore
//! use packfs::Vfs;
//!
//! let vfs = Vfs::new();
//! vfs.mount("base.zip", "", true)?;
//! vfs.mount("patch.zip", "", false)?; // shadows base.zip
//! let data = vfs.read_to_vec("maps/e1m1.bsp")?;
//! ```

use crate::archiver::dir::DirArchive;
use crate::archiver::sevenz::SevenZFormat;
use crate::archiver::{Archive, ArchiveFormat, FormatInfo, StreamSource, builtin_formats};
use crate::config::Config;
use crate::file::{File, OpenMode};
use crate::metadata::Metadata;
use crate::mount::{Mount, MountTable, detect};
use crate::path::VirtualPath;
use crate::source::{FileSource, MemorySource, Source};
use crate::sync::{read_or_recover, write_or_recover};
use crate::{Error, Result};
use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// A resolved path.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Canonical virtual path.
    pub path: VirtualPath,
    /// Source name of the mount that provides the entry, or `None` for a
    /// directory that only exists because a mount point lies beneath it.
    pub source: Option<String>,
    /// Entry metadata.
    pub metadata: Metadata,
}

enum Located {
    Entry {
        mount: Arc<Mount>,
        relative: VirtualPath,
        metadata: Metadata,
    },
    /// An ancestor of a mount point, or the root.
    Implicit,
}

/// A virtual filesystem.
///
/// All methods take `&self`; a `Vfs` can be shared between threads. Several
/// independent instances may exist in one process.
pub struct Vfs {
    mounts: RwLock<MountTable>,
    formats: RwLock<Vec<Arc<dyn ArchiveFormat>>>,
    allow_symlinks: AtomicBool,
    writers: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("search_path", &self.search_path())
            .field("write_dir", &self.write_dir())
            .field("allow_symlinks", &self.allows_symlinks())
            .finish_non_exhaustive()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Creates an empty filesystem with every built-in format registered.
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(MountTable::default()),
            formats: RwLock::new(builtin_formats()),
            allow_symlinks: AtomicBool::new(false),
            writers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a filesystem and applies `config`.
    ///
    /// The write directory is mounted first at the highest precedence, then
    /// the search path entries in order.
    pub fn with_config(config: Config) -> Result<Self> {
        let vfs = Self::new();
        vfs.register_format(Arc::new(SevenZFormat::with_cache_folders(
            config.archive_cache_folders,
        )));
        vfs.set_allow_symlinks(config.allow_symlinks);
        if let Some(dir) = &config.write_dir {
            vfs.mount_write_dir(dir, &config.write_dir_mount_point)?;
        }
        for entry in &config.search_path {
            vfs.mount(&entry.source, &entry.mount_point, entry.append)?;
        }
        Ok(vfs)
    }

    // ------------------------------------------------------------------
    // Mounting
    // ------------------------------------------------------------------

    /// Mounts a native directory or archive file.
    ///
    /// Archive files are offered to every registered format, formats whose
    /// extensions match the file name first. Mounting a source that is
    /// already mounted does nothing.
    pub fn mount(&self, source: impl AsRef<Path>, mount_point: &str, append: bool) -> Result<()> {
        let source = source.as_ref();
        let name = source.to_string_lossy().into_owned();
        let mount_point = VirtualPath::new(mount_point)?;
        if self.is_mounted(&name) {
            log::debug!("{} is already mounted", name);
            return Ok(());
        }
        let archive: Arc<dyn Archive> = if source.is_dir() {
            Arc::new(DirArchive::open(source)?)
        } else {
            let file = FileSource::open(source)?;
            self.detect(&file, &name)?
        };
        self.insert(name, mount_point, archive, append);
        Ok(())
    }

    /// Mounts an archive held in memory under the source name `name`.
    pub fn mount_memory(
        &self,
        data: impl Into<Arc<[u8]>>,
        name: &str,
        mount_point: &str,
        append: bool,
    ) -> Result<()> {
        self.mount_source(Box::new(MemorySource::new(data)), name, mount_point, append)
    }

    /// Mounts an archive read from any [`Source`].
    pub fn mount_source(
        &self,
        source: Box<dyn Source>,
        name: &str,
        mount_point: &str,
        append: bool,
    ) -> Result<()> {
        let mount_point = VirtualPath::new(mount_point)?;
        if self.is_mounted(name) {
            return Ok(());
        }
        let archive = self.detect(source.as_ref(), name)?;
        self.insert(name.to_string(), mount_point, archive, append);
        Ok(())
    }

    /// Mounts an archive that is itself a file in this filesystem.
    ///
    /// `file` must be open for reading. The new mount reopens the entry for
    /// every read, so `file` can be closed afterwards.
    pub fn mount_handle(&self, file: &File, name: &str, mount_point: &str, append: bool) -> Result<()> {
        let (archive, relative) = file.archive_entry()?;
        let source = StreamSource::open(archive, relative)?;
        self.mount_source(Box::new(source), name, mount_point, append)
    }

    /// Mounts a native directory at the highest precedence and makes it the
    /// write target.
    pub fn mount_write_dir(&self, dir: impl AsRef<Path>, mount_point: &str) -> Result<()> {
        let dir = dir.as_ref();
        let name = dir.to_string_lossy().into_owned();
        if !self.is_mounted(&name) {
            let mount_point = VirtualPath::new(mount_point)?;
            let archive = Arc::new(DirArchive::open(dir)?);
            self.insert(name.clone(), mount_point, archive, false);
        }
        self.set_write_dir(&name)
    }

    /// Removes a source from the search path.
    ///
    /// Files opened through it fail with [`Error::HandleInvalidated`] from
    /// now on. If it was the write target, there is no write target anymore.
    pub fn unmount(&self, source: &str) -> Result<()> {
        let mount = write_or_recover(&self.mounts)
            .remove(source)
            .ok_or_else(|| Error::NotMounted {
                source_name: source.to_string(),
            })?;
        mount.state.invalidate();
        log::debug!("unmounted {}", source);
        Ok(())
    }

    fn is_mounted(&self, name: &str) -> bool {
        read_or_recover(&self.mounts).find(name).is_some()
    }

    fn detect(&self, source: &dyn Source, name: &str) -> Result<Arc<dyn Archive>> {
        let formats = read_or_recover(&self.formats).clone();
        detect(&formats, source, name)
    }

    fn insert(&self, name: String, mount_point: VirtualPath, archive: Arc<dyn Archive>, append: bool) {
        let mut table = write_or_recover(&self.mounts);
        if table.find(&name).is_some() {
            return;
        }
        log::debug!(
            "mounted {} ({}) at {}{}",
            name,
            archive.format(),
            mount_point,
            if append { ", lowest precedence" } else { "" }
        );
        table.insert(Arc::new(Mount::new(name, mount_point, archive)), append);
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Stats `relative` inside one mount, honouring the symlink policy.
    fn stat_in(&self, mount: &Mount, relative: &VirtualPath) -> Result<Metadata> {
        if !self.allows_symlinks() {
            self.check_no_symlinks(mount, relative)?;
        }
        mount.archive.stat(relative)
    }

    /// Fails if any existing component of `relative` is a symbolic link.
    fn check_no_symlinks(&self, mount: &Mount, relative: &VirtualPath) -> Result<()> {
        let mut prefix = VirtualPath::root();
        for component in relative.components() {
            prefix = prefix.join(component)?;
            match mount.archive.stat(&prefix) {
                Ok(meta) if meta.is_symlink() => {
                    return Err(Error::SymlinkForbidden {
                        path: mount.mount_point.join(prefix.as_str())?.as_str().to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() || matches!(e, Error::NotADirectory { .. }) => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn locate(&self, table: &MountTable, path: &VirtualPath) -> Result<Located> {
        let mut implicit = path.is_root();
        let mut forbidden = None;
        for mount in &table.mounts {
            let Some(relative) = path.strip_prefix(&mount.mount_point) else {
                implicit |= mount.mount_point.starts_with(path);
                continue;
            };
            let relative = VirtualPath::new(relative)?;
            match self.stat_in(mount, &relative) {
                // An implicit directory from a higher mount shadows files.
                Ok(metadata) if implicit && !metadata.is_dir() => {}
                Ok(metadata) => {
                    return Ok(Located::Entry {
                        mount: Arc::clone(mount),
                        relative,
                        metadata,
                    });
                }
                Err(e) if e.is_not_found() || matches!(e, Error::NotADirectory { .. }) => {}
                Err(e @ Error::SymlinkForbidden { .. }) => {
                    log::trace!("{}: {}", mount.source_name, e);
                    forbidden.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if implicit {
            return Ok(Located::Implicit);
        }
        Err(forbidden.unwrap_or_else(|| Error::NotFound {
            path: path.as_str().to_string(),
        }))
    }

    /// Finds the entry that `path` refers to.
    pub fn resolve(&self, path: &str) -> Result<Entry> {
        let path = VirtualPath::new(path)?;
        let table = read_or_recover(&self.mounts);
        Ok(match self.locate(&table, &path)? {
            Located::Entry {
                mount, metadata, ..
            } => Entry {
                path,
                source: Some(mount.source_name.clone()),
                metadata,
            },
            Located::Implicit => Entry {
                path,
                source: None,
                metadata: Metadata::directory(),
            },
        })
    }

    /// Returns true if `path` resolves.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Returns the metadata of `path`.
    pub fn stat(&self, path: &str) -> Result<Metadata> {
        self.resolve(path).map(|entry| entry.metadata)
    }

    /// Returns the source that provides `path`, or `None` for implicit
    /// directories.
    pub fn real_dir(&self, path: &str) -> Result<Option<String>> {
        self.resolve(path).map(|entry| entry.source)
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Opens a file for reading.
    pub fn open_read(&self, path: &str) -> Result<File> {
        let path = VirtualPath::new(path)?;
        let table = read_or_recover(&self.mounts);
        match self.locate(&table, &path)? {
            Located::Entry {
                mount,
                relative,
                metadata,
            } => {
                if metadata.is_dir() {
                    return Err(Error::NotAFile {
                        path: path.as_str().to_string(),
                    });
                }
                let generation = mount.state.generation();
                let stream = mount.archive.open_read(&relative)?;
                log::trace!("opened {} from {}", path, mount.source_name);
                Ok(File::reader(path, &mount, relative, stream, generation))
            }
            Located::Implicit => Err(Error::NotAFile {
                path: path.as_str().to_string(),
            }),
        }
    }

    /// Creates or truncates a file in the write directory.
    pub fn open_write(&self, path: &str) -> Result<File> {
        self.open_for_writing(path, OpenMode::Write)
    }

    /// Opens a file in the write directory for appending, creating it if
    /// needed.
    pub fn open_append(&self, path: &str) -> Result<File> {
        self.open_for_writing(path, OpenMode::Append)
    }

    fn open_for_writing(&self, path: &str, mode: OpenMode) -> Result<File> {
        let path = VirtualPath::new(path)?;
        let (mount, relative) = self.write_target(&path)?;
        let generation = mount.state.generation();
        let stream = match mode {
            OpenMode::Append => mount.archive.open_append(&relative)?,
            _ => mount.archive.open_write(&relative)?,
        };
        log::trace!("opened {} for writing in {}", path, mount.source_name);
        File::writer(path, &mount, relative, stream, mode, generation, &self.writers)
    }

    /// Creates a directory and any missing parents in the write directory.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        let path = VirtualPath::new(path)?;
        let (mount, relative) = self.write_target(&path)?;
        let mut current = VirtualPath::root();
        for component in relative.components() {
            current = current.join(component)?;
            mount.archive.mkdir(&current)?;
        }
        Ok(())
    }

    /// Deletes a file or an empty directory from the write directory.
    pub fn delete(&self, path: &str) -> Result<()> {
        let path = VirtualPath::new(path)?;
        let (mount, relative) = self.write_target(&path)?;
        mount.archive.remove(&relative)?;
        log::debug!("deleted {} from {}", path, mount.source_name);
        Ok(())
    }

    /// Maps `path` into the write mount.
    fn write_target(&self, path: &VirtualPath) -> Result<(Arc<Mount>, VirtualPath)> {
        let mount = read_or_recover(&self.mounts)
            .write
            .clone()
            .ok_or(Error::NoWriteDir)?;
        let denied = || Error::PermissionDenied {
            path: path.as_str().to_string(),
        };
        let relative = path.strip_prefix(&mount.mount_point).ok_or_else(denied)?;
        if !mount.archive.is_writable() {
            return Err(denied());
        }
        let relative = VirtualPath::new(relative)?;
        if !self.allows_symlinks() {
            self.check_no_symlinks(&mount, &relative)?;
        }
        Ok((mount, relative))
    }

    /// Reads a whole file.
    pub fn read_to_vec(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.open_read(path)?;
        let mut out = Vec::new();
        file.read_to_end(&mut out)?;
        file.close()?;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Write target
    // ------------------------------------------------------------------

    /// Makes the mounted source `source` the write target.
    ///
    /// Fails with [`Error::Busy`] while files are open for writing.
    pub fn set_write_dir(&self, source: &str) -> Result<()> {
        let mut table = write_or_recover(&self.mounts);
        self.ensure_no_writers()?;
        let mount = table.find(source).cloned().ok_or_else(|| Error::NotMounted {
            source_name: source.to_string(),
        })?;
        if !mount.archive.is_writable() {
            return Err(Error::PermissionDenied {
                path: source.to_string(),
            });
        }
        log::debug!("write directory is now {}", source);
        table.write = Some(mount);
        Ok(())
    }

    /// Removes the write target; the source stays mounted.
    pub fn clear_write_dir(&self) -> Result<()> {
        let mut table = write_or_recover(&self.mounts);
        self.ensure_no_writers()?;
        if table.write.take().is_some() {
            log::debug!("write directory cleared");
        }
        Ok(())
    }

    /// Returns the source name of the write target.
    pub fn write_dir(&self) -> Option<String> {
        read_or_recover(&self.mounts)
            .write
            .as_ref()
            .map(|m| m.source_name.clone())
    }

    /// Returns the native directory of the write target.
    pub fn write_dir_path(&self) -> Option<PathBuf> {
        read_or_recover(&self.mounts)
            .write
            .as_ref()
            .and_then(|m| m.archive.native_path().map(Path::to_path_buf))
    }

    fn ensure_no_writers(&self) -> Result<()> {
        match self.writers.load(Ordering::Acquire) {
            0 => Ok(()),
            open_files => Err(Error::Busy { open_files }),
        }
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Calls `callback` once per name in `dir`, merged across mounts.
    ///
    /// Names are passed in mount precedence order, each once. Returning
    /// `ControlFlow::Break` stops the walk and is passed back to the caller.
    pub fn enumerate<F>(&self, dir: &str, mut callback: F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let dir = VirtualPath::new(dir)?;
        let allow_symlinks = self.allows_symlinks();
        let table = read_or_recover(&self.mounts);
        let mut seen: HashSet<String> = HashSet::new();
        let mut found = dir.is_root();

        for mount in &table.mounts {
            let Some(relative) = dir.strip_prefix(&mount.mount_point) else {
                let Some(rest) = mount.mount_point.strip_prefix(&dir) else {
                    continue;
                };
                let Some(child) = rest.split('/').next() else {
                    continue;
                };
                found = true;
                if seen.insert(child.to_string()) && callback(child).is_break() {
                    return Ok(ControlFlow::Break(()));
                }
                continue;
            };
            let relative = VirtualPath::new(relative)?;
            match self.stat_in(mount, &relative) {
                Ok(meta) if meta.is_dir() || (allow_symlinks && meta.is_symlink()) => {}
                // A higher directory hides files of the same name further down.
                Ok(_) if found => continue,
                Ok(_) => {
                    return Err(Error::NotADirectory {
                        path: dir.as_str().to_string(),
                    });
                }
                Err(e) if e.is_not_found() || e.is_path_error() => continue,
                Err(Error::NotADirectory { .. }) => continue,
                Err(e) => return Err(e),
            }
            found = true;

            let archive = &mount.archive;
            let flow = archive.enumerate(&relative, &mut |name| {
                if seen.contains(name) {
                    return ControlFlow::Continue(());
                }
                if !allow_symlinks {
                    let hidden = relative
                        .join(name)
                        .and_then(|child| archive.stat(&child))
                        .is_ok_and(|meta| meta.is_symlink());
                    if hidden {
                        return ControlFlow::Continue(());
                    }
                }
                seen.insert(name.to_string());
                callback(name)
            });
            match flow {
                Ok(ControlFlow::Break(())) => return Ok(ControlFlow::Break(())),
                Ok(ControlFlow::Continue(())) => {}
                // A directory that disappeared between stat and listing.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if found {
            Ok(ControlFlow::Continue(()))
        } else {
            Err(Error::NotFound {
                path: dir.as_str().to_string(),
            })
        }
    }

    /// Returns the sorted, de-duplicated names in `dir`.
    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        let _flow = self.enumerate(dir, |name| {
            names.insert(name.to_string());
            ControlFlow::Continue(())
        })?;
        Ok(names.into_iter().collect())
    }

    // ------------------------------------------------------------------
    // Queries and settings
    // ------------------------------------------------------------------

    /// Returns the mounted source names, highest precedence first.
    pub fn search_path(&self) -> Vec<String> {
        read_or_recover(&self.mounts)
            .mounts
            .iter()
            .map(|m| m.source_name.clone())
            .collect()
    }

    /// Returns where `source` is mounted.
    pub fn mount_point(&self, source: &str) -> Result<VirtualPath> {
        read_or_recover(&self.mounts)
            .find(source)
            .map(|m| m.mount_point.clone())
            .ok_or_else(|| Error::NotMounted {
                source_name: source.to_string(),
            })
    }

    /// Returns the registered formats in detection order.
    pub fn supported_formats(&self) -> Vec<FormatInfo> {
        read_or_recover(&self.formats)
            .iter()
            .map(|f| *f.info())
            .collect()
    }

    /// Registers a format, replacing any registered format with the same
    /// name in place.
    pub fn register_format(&self, format: Arc<dyn ArchiveFormat>) {
        let mut formats = write_or_recover(&self.formats);
        let name = format.info().name;
        match formats
            .iter_mut()
            .find(|f| f.info().name.eq_ignore_ascii_case(name))
        {
            Some(slot) => *slot = format,
            None => formats.push(format),
        }
        log::debug!("registered format {}", name);
    }

    /// Removes a format by name. Archives already mounted stay usable.
    pub fn deregister_format(&self, name: &str) -> bool {
        let mut formats = write_or_recover(&self.formats);
        let before = formats.len();
        formats.retain(|f| !f.info().name.eq_ignore_ascii_case(name));
        formats.len() != before
    }

    /// Allows or forbids symbolic links in lookups and listings.
    pub fn set_allow_symlinks(&self, allow: bool) {
        self.allow_symlinks.store(allow, Ordering::Release);
    }

    /// Returns true if symbolic links are followed.
    pub fn allows_symlinks(&self) -> bool {
        self.allow_symlinks.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn grp(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = b"KenSilverman".to_vec();
        out.extend_from_slice(&(files.len() as u32).to_le_bytes());
        for (name, data) in files {
            let mut field = [0u8; 12];
            field[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&field);
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }
        for (_, data) in files {
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_shadowing_follows_precedence() {
        let vfs = Vfs::new();
        vfs.mount_memory(grp(&[("A.TXT", b"low")]), "low.grp", "", true).unwrap();
        vfs.mount_memory(grp(&[("A.TXT", b"high")]), "high.grp", "", false).unwrap();
        assert_eq!(vfs.read_to_vec("A.TXT").unwrap(), b"high");
        assert_eq!(vfs.real_dir("A.TXT").unwrap().as_deref(), Some("high.grp"));
        assert_eq!(vfs.search_path(), ["high.grp", "low.grp"]);

        vfs.unmount("high.grp").unwrap();
        assert_eq!(vfs.read_to_vec("A.TXT").unwrap(), b"low");
    }

    #[test]
    fn test_mount_twice_is_noop() {
        let vfs = Vfs::new();
        vfs.mount_memory(grp(&[("A", b"1")]), "a.grp", "", true).unwrap();
        vfs.mount_memory(grp(&[("B", b"2")]), "a.grp", "", true).unwrap();
        assert_eq!(vfs.search_path().len(), 1);
        assert!(!vfs.exists("B"));
    }

    #[test]
    fn test_mount_point_implicit_dirs() {
        let vfs = Vfs::new();
        vfs.mount_memory(grp(&[("X.DAT", b"x")]), "x.grp", "a/b/c", true).unwrap();
        assert_eq!(vfs.list("").unwrap(), ["a"]);
        assert_eq!(vfs.list("a").unwrap(), ["b"]);
        assert_eq!(vfs.list("a/b/c").unwrap(), ["X.DAT"]);
        let entry = vfs.resolve("a/b").unwrap();
        assert!(entry.metadata.is_dir());
        assert_eq!(entry.source, None);
        assert!(vfs.read_to_vec("X.DAT").unwrap_err().is_not_found());
        assert_eq!(vfs.read_to_vec("/a/b/c/X.DAT").unwrap(), b"x");
        assert_eq!(vfs.mount_point("x.grp").unwrap().as_str(), "a/b/c");
    }

    #[test]
    fn test_unmount_invalidates_handles() {
        let vfs = Vfs::new();
        vfs.mount_memory(grp(&[("A", b"abcdef")]), "a.grp", "", true).unwrap();
        let mut file = vfs.open_read("A").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        vfs.unmount("a.grp").unwrap();
        assert!(matches!(file.read(&mut buf), Err(Error::HandleInvalidated { .. })));
        assert!(matches!(file.tell(), Err(Error::HandleInvalidated { .. })));
        file.close().unwrap();
        assert!(matches!(vfs.unmount("a.grp"), Err(Error::NotMounted { .. })));
    }

    #[test]
    fn test_traversal_rejected() {
        let vfs = Vfs::new();
        assert!(matches!(
            vfs.resolve("../../etc/passwd"),
            Err(Error::PathTraversalRejected { .. })
        ));
        assert!(matches!(
            vfs.open_read("a/../../x"),
            Err(Error::PathTraversalRejected { .. })
        ));
    }

    #[test]
    fn test_write_requires_write_dir() {
        let vfs = Vfs::new();
        vfs.mount_memory(grp(&[("A", b"1")]), "a.grp", "", true).unwrap();
        assert!(matches!(vfs.open_write("A"), Err(Error::NoWriteDir)));
        assert!(matches!(
            vfs.set_write_dir("a.grp"),
            Err(Error::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_write_visible_and_busy() {
        let tmp = TempDir::new().unwrap();
        let vfs = Vfs::new();
        vfs.mount_write_dir(tmp.path(), "save").unwrap();
        assert!(matches!(
            vfs.open_write("elsewhere.txt"),
            Err(Error::PermissionDenied { .. })
        ));

        vfs.mkdir("save/slot/1").unwrap();
        let mut file = vfs.open_write("save/slot/1/game.sav").unwrap();
        file.write(b"state").unwrap();
        assert!(matches!(vfs.clear_write_dir(), Err(Error::Busy { open_files: 1 })));
        file.close().unwrap();
        vfs.clear_write_dir().unwrap();
        vfs.set_write_dir(&tmp.path().to_string_lossy()).unwrap();

        assert_eq!(vfs.read_to_vec("save/slot/1/game.sav").unwrap(), b"state");
        assert_eq!(vfs.list("save/slot").unwrap(), ["1"]);
        vfs.delete("save/slot/1/game.sav").unwrap();
        assert!(!vfs.exists("save/slot/1/game.sav"));
    }

    #[test]
    fn test_enumerate_stops_and_errors() {
        let vfs = Vfs::new();
        vfs.mount_memory(grp(&[("A", b""), ("B", b"")]), "a.grp", "", true).unwrap();
        let mut count = 0;
        let flow = vfs
            .enumerate("", |_| {
                count += 1;
                ControlFlow::Break(())
            })
            .unwrap();
        assert!(flow.is_break());
        assert_eq!(count, 1);
        assert!(vfs.list("missing").unwrap_err().is_not_found());
        assert!(matches!(vfs.list("A"), Err(Error::NotADirectory { .. })));
    }

    #[test]
    fn test_format_registry() {
        let vfs = Vfs::new();
        let count = vfs.supported_formats().len();
        assert!(vfs.deregister_format("grp"));
        assert!(!vfs.deregister_format("grp"));
        assert_eq!(vfs.supported_formats().len(), count - 1);
        assert!(matches!(
            vfs.mount_memory(grp(&[("A", b"")]), "a.grp", "", true),
            Err(Error::UnsupportedFormat { .. })
        ));
        vfs.register_format(Arc::new(crate::archiver::grp::GrpFormat));
        vfs.mount_memory(grp(&[("A", b"")]), "a.grp", "", true).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_hidden_unless_allowed() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("real")).unwrap();
        std::fs::write(tmp.path().join("real/f.txt"), b"f").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let vfs = Vfs::new();
        vfs.mount(tmp.path(), "", true).unwrap();
        assert_eq!(vfs.list("").unwrap(), ["real"]);
        assert!(matches!(
            vfs.open_read("link/f.txt"),
            Err(Error::SymlinkForbidden { .. })
        ));

        vfs.set_allow_symlinks(true);
        assert_eq!(vfs.list("").unwrap(), ["link", "real"]);
        assert_eq!(vfs.read_to_vec("link/f.txt").unwrap(), b"f");
    }
}
