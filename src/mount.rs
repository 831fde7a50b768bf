//! Mount table and format detection.

use crate::archiver::{Archive, ArchiveFormat, Detection};
use crate::path::VirtualPath;
use crate::source::Source;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Liveness shared between a mount and the handles opened through it.
///
/// Unmounting bumps the generation; a handle compares the generation it
/// captured at open time before and after every operation.
#[derive(Debug)]
pub(crate) struct MountState {
    source_name: String,
    generation: AtomicU64,
}

impl MountState {
    pub fn new(source_name: String) -> Self {
        Self {
            source_name,
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Fails with `HandleInvalidated` if the mount changed since `captured`.
    pub fn check(&self, captured: u64) -> Result<()> {
        if self.generation() == captured {
            Ok(())
        } else {
            Err(Error::HandleInvalidated {
                source_name: self.source_name.clone(),
            })
        }
    }
}

/// One entry of the search path.
pub(crate) struct Mount {
    pub source_name: String,
    pub mount_point: VirtualPath,
    pub archive: Arc<dyn Archive>,
    pub state: Arc<MountState>,
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("source_name", &self.source_name)
            .field("mount_point", &self.mount_point)
            .field("format", &self.archive.format())
            .finish()
    }
}

impl Mount {
    pub fn new(source_name: String, mount_point: VirtualPath, archive: Arc<dyn Archive>) -> Self {
        let state = Arc::new(MountState::new(source_name.clone()));
        Self {
            source_name,
            mount_point,
            archive,
            state,
        }
    }
}

/// The ordered search path plus the designated write mount.
#[derive(Debug, Default)]
pub(crate) struct MountTable {
    /// Highest precedence first.
    pub mounts: Vec<Arc<Mount>>,
    pub write: Option<Arc<Mount>>,
}

impl MountTable {
    pub fn find(&self, source_name: &str) -> Option<&Arc<Mount>> {
        self.mounts.iter().find(|m| m.source_name == source_name)
    }

    pub fn insert(&mut self, mount: Arc<Mount>, append: bool) {
        if append {
            self.mounts.push(mount);
        } else {
            self.mounts.insert(0, mount);
        }
    }

    pub fn remove(&mut self, source_name: &str) -> Option<Arc<Mount>> {
        let index = self.mounts.iter().position(|m| m.source_name == source_name)?;
        let mount = self.mounts.remove(index);
        if self
            .write
            .as_ref()
            .is_some_and(|w| Arc::ptr_eq(w, &mount))
        {
            log::debug!("write directory '{}' unmounted", source_name);
            self.write = None;
        }
        Some(mount)
    }
}

/// Offers `source` to each format, extension matches first.
///
/// The first format that claims the source decides the outcome, including
/// errors for damaged containers.
pub(crate) fn detect(
    formats: &[Arc<dyn ArchiveFormat>],
    source: &dyn Source,
    name: &str,
) -> Result<Arc<dyn Archive>> {
    let extension = name
        .rsplit(['/', '\\'])
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let matches_extension = |format: &Arc<dyn ArchiveFormat>| {
        extension
            .as_deref()
            .is_some_and(|ext| format.info().extensions.iter().any(|e| *e == ext))
    };
    let ordered = formats
        .iter()
        .filter(|f| matches_extension(*f))
        .chain(formats.iter().filter(|f| !matches_extension(*f)));

    for format in ordered {
        match format.open(source, name)? {
            Detection::Claimed(archive) => {
                log::debug!("{}: claimed by {}", name, format.info().name);
                return Ok(archive);
            }
            Detection::NotThisFormat => {
                log::trace!("{}: not {}", name, format.info().name);
            }
        }
    }
    Err(Error::UnsupportedFormat {
        source_name: name.to_string(),
    })
}
