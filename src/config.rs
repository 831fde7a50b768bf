//! Filesystem configuration.
//!
//! A [`Config`] describes a complete [`Vfs`](crate::Vfs) setup: the search
//! path, the write directory and the symlink policy. It is applied once by
//! [`Vfs::with_config`](crate::Vfs::with_config).
//!
//! # Example
//!
//! ```rust,ignore
//! use packfs::{Config, Vfs};
//!
//! let config = Config::new()
//!     .write_dir("saves")
//!     .mount("base.pk3", "/", true)
//!     .mount("mods", "/", false);
//! let vfs = Vfs::with_config(config)?;
//! ```

use crate::archiver::sevenz::DEFAULT_CACHE_FOLDERS;
use std::path::PathBuf;

/// One source in the configured search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPathEntry {
    /// Native archive file or directory.
    pub source: PathBuf,
    /// Virtual directory the source appears under.
    pub mount_point: String,
    /// Lowest precedence if true, highest if false.
    pub append: bool,
}

/// Settings applied when a [`Vfs`](crate::Vfs) is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Follow and list symbolic links. Defaults to `false`.
    pub allow_symlinks: bool,
    /// Native directory mounted first and designated as the write target.
    pub write_dir: Option<PathBuf>,
    /// Mount point of the write directory. Defaults to the root.
    pub write_dir_mount_point: String,
    /// Sources mounted in order after the write directory.
    pub search_path: Vec<SearchPathEntry>,
    /// Decoded 7z folders kept per archive.
    pub archive_cache_folders: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allow_symlinks: false,
            write_dir: None,
            write_dir_mount_point: String::new(),
            search_path: Vec::new(),
            archive_cache_folders: DEFAULT_CACHE_FOLDERS,
        }
    }
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the symlink policy.
    pub fn allow_symlinks(mut self, allow: bool) -> Self {
        self.allow_symlinks = allow;
        self
    }

    /// Sets the write directory.
    pub fn write_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.write_dir = Some(dir.into());
        self
    }

    /// Sets where the write directory is mounted.
    pub fn write_dir_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.write_dir_mount_point = mount_point.into();
        self
    }

    /// Adds a source to the search path.
    pub fn mount(
        mut self,
        source: impl Into<PathBuf>,
        mount_point: impl Into<String>,
        append: bool,
    ) -> Self {
        self.search_path.push(SearchPathEntry {
            source: source.into(),
            mount_point: mount_point.into(),
            append,
        });
        self
    }

    /// Sets the 7z folder cache capacity (at least one folder is cached).
    pub fn archive_cache_folders(mut self, folders: usize) -> Self {
        self.archive_cache_folders = folders;
        self
    }

    /// Builds the conventional game setup.
    ///
    /// The per-user directory `<data dir>/<org>/<app>` is created if needed
    /// and becomes the write directory, searched first. `base_dir` is
    /// searched next. Every file in `base_dir` whose extension equals
    /// `archive_ext` (case-insensitive) is mounted at the root, ahead of both
    /// when `archives_first` is set and behind them otherwise, in name order.
    #[cfg(feature = "sane-config")]
    pub fn sane(
        org: &str,
        app: &str,
        archive_ext: &str,
        base_dir: impl Into<PathBuf>,
        archives_first: bool,
    ) -> crate::Result<Self> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no per-user data directory on this platform",
            ))
        })?;
        let pref_dir = data_dir.join(org).join(app);
        std::fs::create_dir_all(&pref_dir)?;
        log::debug!("preference directory {}", pref_dir.display());
        Self::sane_with_pref_dir(pref_dir, archive_ext, base_dir.into(), archives_first)
    }

    #[cfg(feature = "sane-config")]
    fn sane_with_pref_dir(
        pref_dir: PathBuf,
        archive_ext: &str,
        base_dir: PathBuf,
        archives_first: bool,
    ) -> crate::Result<Self> {
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(&base_dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(archive_ext));
            if matches && path.is_file() {
                archives.push(path);
            }
        }
        archives.sort();

        let mut config = Self::new().write_dir(pref_dir).mount(base_dir, "", true);
        if archives_first {
            // Prepending reverses order, so walk backwards to keep name order.
            for archive in archives.into_iter().rev() {
                config = config.mount(archive, "", false);
            }
        } else {
            for archive in archives {
                config = config.mount(archive, "", true);
            }
        }
        Ok(config)
    }
}
