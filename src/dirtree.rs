//! In-memory entry index shared by the packed archive formats.
//!
//! Archive tables list files by full path and rarely list the directories
//! those paths imply. [`DirTree`] inserts every missing parent as an implicit
//! directory, so `a/b/c.txt` alone makes `a` and `a/b` stat-able and
//! enumerable.

use crate::metadata::Metadata;
use crate::path::VirtualPath;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;

/// One indexed entry.
#[derive(Debug)]
pub(crate) struct Node<T> {
    /// Canonical path with the case the archive used.
    pub path: String,
    pub meta: Metadata,
    /// Format-specific location data; `None` for directories.
    pub payload: Option<T>,
    /// True for directories that exist only because a child names them.
    implicit: bool,
    /// Lookup key to display name, sorted by key.
    children: BTreeMap<String, String>,
}

impl<T> Node<T> {
    fn directory(path: String, implicit: bool) -> Self {
        Self {
            path,
            meta: Metadata::directory(),
            payload: None,
            implicit,
            children: BTreeMap::new(),
        }
    }
}

/// A path-indexed tree of archive entries.
#[derive(Debug)]
pub(crate) struct DirTree<T> {
    nodes: HashMap<String, Node<T>>,
    case_insensitive: bool,
}

impl<T> DirTree<T> {
    pub fn new(case_insensitive: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(String::new(), Node::directory(String::new(), false));
        Self {
            nodes,
            case_insensitive,
        }
    }

    fn key(&self, path: &str) -> String {
        if self.case_insensitive {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }

    /// Number of entries, excluding the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Inserts a file entry, creating implicit parents.
    ///
    /// Returns `Ok(false)` if an entry with the same path already exists; the
    /// first occurrence wins.
    pub fn insert_file(&mut self, raw_path: &str, meta: Metadata, payload: T) -> Result<bool> {
        let path = VirtualPath::new(raw_path)?;
        if path.is_root() {
            return Err(Error::InvalidPath {
                path: raw_path.to_string(),
                reason: "archive entry names the root",
            });
        }
        self.insert(path, meta, Some(payload))
    }

    /// Inserts an explicit directory entry, creating implicit parents.
    ///
    /// An explicit directory replaces the metadata of an implicit one created
    /// earlier by a child.
    pub fn insert_dir(&mut self, raw_path: &str, meta: Metadata) -> Result<bool> {
        let path = VirtualPath::new(raw_path)?;
        if path.is_root() {
            return Ok(false);
        }
        self.insert(path, meta, None)
    }

    fn insert(&mut self, path: VirtualPath, meta: Metadata, payload: Option<T>) -> Result<bool> {
        let parent = path.parent().unwrap_or_default();
        self.ensure_dir(&parent)?;

        let key = self.key(path.as_str());
        if let Some(existing) = self.nodes.get_mut(&key) {
            if existing.implicit && meta.is_dir() && payload.is_none() {
                existing.meta = meta;
                existing.implicit = false;
                return Ok(true);
            }
            log::warn!("duplicate archive entry '{}', keeping the first", path);
            return Ok(false);
        }

        log::trace!("indexed {} ({} bytes)", path, meta.size);
        let name = path.file_name().to_string();
        let name_key = self.key(&name);
        let parent_key = self.key(parent.as_str());
        if let Some(parent_node) = self.nodes.get_mut(&parent_key) {
            parent_node.children.insert(name_key, name);
        }
        self.nodes.insert(
            key,
            Node {
                path: path.as_str().to_string(),
                meta,
                payload,
                implicit: false,
                children: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    /// Creates `dir` and all of its parents as implicit directories.
    fn ensure_dir(&mut self, dir: &VirtualPath) -> Result<()> {
        let mut current = VirtualPath::root();
        for segment in dir.components() {
            let next = current.join(segment)?;
            let key = self.key(next.as_str());
            match self.nodes.get(&key) {
                Some(node) if node.meta.is_dir() => {}
                Some(node) => {
                    return Err(Error::NotADirectory {
                        path: node.path.clone(),
                    });
                }
                None => {
                    let parent_key = self.key(current.as_str());
                    let name_key = self.key(segment);
                    if let Some(parent_node) = self.nodes.get_mut(&parent_key) {
                        parent_node.children.insert(name_key, segment.to_string());
                    }
                    self.nodes
                        .insert(key, Node::directory(next.as_str().to_string(), true));
                }
            }
            current = next;
        }
        Ok(())
    }

    /// Looks up a node by canonical path.
    pub fn get(&self, path: &VirtualPath) -> Option<&Node<T>> {
        self.nodes.get(&self.key(path.as_str()))
    }

    /// Returns the metadata for `path`, or `NotFound`.
    pub fn stat(&self, path: &VirtualPath) -> Result<Metadata> {
        self.get(path)
            .map(|node| node.meta.clone())
            .ok_or_else(|| Error::NotFound {
                path: path.as_str().to_string(),
            })
    }

    /// Returns the payload of the file at `path`.
    ///
    /// Fails with `NotFound` for missing paths and `NotAFile` for directories.
    pub fn file(&self, path: &VirtualPath) -> Result<(&Node<T>, &T)> {
        let node = self.get(path).ok_or_else(|| Error::NotFound {
            path: path.as_str().to_string(),
        })?;
        match &node.payload {
            Some(payload) => Ok((node, payload)),
            None => Err(Error::NotAFile {
                path: path.as_str().to_string(),
            }),
        }
    }

    /// Calls `callback` with the name of every child of `dir`, in key order.
    pub fn enumerate(
        &self,
        dir: &VirtualPath,
        callback: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>> {
        let node = self.get(dir).ok_or_else(|| Error::NotFound {
            path: dir.as_str().to_string(),
        })?;
        if !node.meta.is_dir() {
            return Err(Error::NotADirectory {
                path: dir.as_str().to_string(),
            });
        }
        for name in node.children.values() {
            if callback(name).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}
