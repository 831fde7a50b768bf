//! Virtual path canonicalization.
//!
//! Every path that enters the virtual filesystem, whether from the caller, a
//! mount point or an archive index, goes through [`VirtualPath::new`]. The
//! canonical form uses `/` separators, has no leading or trailing slash, and
//! contains no empty, `.` or `..` segments. The empty string is the virtual
//! root.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Maximum length for virtual paths (in bytes).
///
/// Archive indexes are attacker-controlled input; this bounds the work done
/// per name and is far above any real filesystem limit.
const MAX_PATH_LENGTH: usize = 32768;

/// A canonical path inside the virtual namespace.
///
/// Both `/` and `\` are accepted as separators on every platform, so a path
/// written on Windows resolves the same way everywhere. Canonicalization
/// collapses `.` and `..`, but a `..` that would climb above the virtual root
/// is rejected with [`Error::PathTraversalRejected`].
///
/// # Examples
///
/// ```
/// use packfs::VirtualPath;
///
/// let path = VirtualPath::new("/maps/./e1m1/../e1m2.bsp").unwrap();
/// assert_eq!(path.as_str(), "maps/e1m2.bsp");
///
/// let path = VirtualPath::new(r"sound\ambience\wind.wav").unwrap();
/// assert_eq!(path.as_str(), "sound/ambience/wind.wav");
///
/// assert!(VirtualPath::new("../../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Returns the virtual root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Canonicalizes a caller-supplied path.
    ///
    /// # Errors
    ///
    /// - [`Error::PathTraversalRejected`] if `..` climbs above the root
    /// - [`Error::InvalidPath`] for NUL bytes, `:` (drive letters and
    ///   alternate stream syntax) or paths over the length limit
    pub fn new(s: &str) -> Result<Self> {
        Ok(Self(canonicalize(s)?))
    }

    /// Returns the canonical path as a string slice (`""` for the root).
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the virtual root.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a relative path, canonicalizing the result.
    ///
    /// The appended part may not climb above `self`'s own root either: the
    /// combined path is canonicalized as a whole.
    pub fn join(&self, other: &str) -> Result<Self> {
        if self.is_root() {
            return Self::new(other);
        }
        Self::new(&format!("{}/{}", self.0, other))
    }

    /// Returns the parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        })
    }

    /// Returns the last segment (`""` for the root).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Returns the file extension of the last segment, if any.
    ///
    /// A leading dot does not start an extension (`.config` has none).
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(pos) => Some(&name[pos + 1..]),
        }
    }

    /// Returns an iterator over the path segments (empty for the root).
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Returns true if `prefix` is a component-wise prefix of this path.
    ///
    /// The root is a prefix of every path.
    pub fn starts_with(&self, prefix: &VirtualPath) -> bool {
        self.strip_prefix(prefix).is_some()
    }

    /// Strips a component-wise prefix, returning the remainder.
    ///
    /// Returns `Some("")` when the paths are equal and `None` when `prefix` is
    /// not a prefix. `"textures"` is not a prefix of `"textures2/a"`.
    pub fn strip_prefix<'a>(&'a self, prefix: &VirtualPath) -> Option<&'a str> {
        if prefix.is_root() {
            return Some(&self.0);
        }
        let rest = self.0.strip_prefix(prefix.as_str())?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix('/')
        }
    }

    /// Maps this path onto a host directory, one component at a time.
    ///
    /// Canonical paths contain no `..` segments, so the result always stays
    /// under `base`.
    pub fn to_native(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for component in self.components() {
            out.push(component);
        }
        out
    }
}

/// Canonicalizes a path string into its virtual form.
fn canonicalize(s: &str) -> Result<String> {
    if s.len() > MAX_PATH_LENGTH {
        return Err(Error::InvalidPath {
            path: truncate_for_error(s),
            reason: "path exceeds maximum length",
        });
    }
    if s.contains('\0') {
        return Err(Error::InvalidPath {
            path: s.replace('\0', "\\0"),
            reason: "contains NUL byte",
        });
    }
    if s.contains(':') {
        return Err(Error::InvalidPath {
            path: s.to_string(),
            reason: "drive or stream separator ':' not allowed",
        });
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in s.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::PathTraversalRejected {
                        path: s.to_string(),
                    });
                }
            }
            other => segments.push(other),
        }
    }

    Ok(segments.join("/"))
}

fn truncate_for_error(s: &str) -> String {
    let mut end = 64.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl TryFrom<&str> for VirtualPath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_simple_file() {
        let path = VirtualPath::new("file.txt").unwrap();
        assert_eq!(path.as_str(), "file.txt");
    }

    #[test]
    fn test_leading_slash_is_root() {
        let path = VirtualPath::new("/maps/e1m1.bsp").unwrap();
        assert_eq!(path.as_str(), "maps/e1m1.bsp");
    }

    #[test]
    fn test_root_forms() {
        for s in ["", "/", "//", ".", "./", "/./."] {
            let path = VirtualPath::new(s).unwrap();
            assert!(path.is_root(), "'{}' should be the root", s);
        }
    }

    #[test]
    fn test_collapses_empty_and_dot_segments() {
        let path = VirtualPath::new("a//b/./c/").unwrap();
        assert_eq!(path.as_str(), "a/b/c");
    }

    #[test]
    fn test_dotdot_inside_root() {
        let path = VirtualPath::new("a/b/../c").unwrap();
        assert_eq!(path.as_str(), "a/c");

        let path = VirtualPath::new("a/..").unwrap();
        assert!(path.is_root());
    }

    #[test]
    fn test_backslash_separator() {
        let path = VirtualPath::new(r"textures\walls\brick.png").unwrap();
        assert_eq!(path.as_str(), "textures/walls/brick.png");
    }

    #[test]
    fn test_traversal_rejected() {
        let err = VirtualPath::new("../../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::PathTraversalRejected { .. }));
    }

    #[test]
    fn test_traversal_after_descent_rejected() {
        let err = VirtualPath::new("a/../../b").unwrap_err();
        assert!(matches!(err, Error::PathTraversalRejected { .. }));
    }

    #[test]
    fn test_backslash_traversal_rejected() {
        let err = VirtualPath::new(r"..\..\windows\system32").unwrap_err();
        assert!(matches!(err, Error::PathTraversalRejected { .. }));
    }

    #[test]
    fn test_nul_rejected() {
        let err = VirtualPath::new("file\0.txt").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert!(err.to_string().contains("NUL"));
    }

    #[test]
    fn test_drive_letter_rejected() {
        let err = VirtualPath::new("C:/windows").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn test_too_long_rejected() {
        let long_path = "a".repeat(MAX_PATH_LENGTH + 1);
        let err = VirtualPath::new(&long_path).unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }

    #[test]
    fn test_valid_dot_names() {
        assert_eq!(VirtualPath::new(".gitignore").unwrap().as_str(), ".gitignore");
        assert_eq!(VirtualPath::new("file..txt").unwrap().as_str(), "file..txt");
        assert_eq!(VirtualPath::new("...").unwrap().as_str(), "...");
    }

    #[test]
    fn test_parent() {
        let path = VirtualPath::new("a/b/c").unwrap();
        assert_eq!(path.parent().unwrap().as_str(), "a/b");

        let path = VirtualPath::new("file").unwrap();
        assert!(path.parent().unwrap().is_root());

        assert!(VirtualPath::root().parent().is_none());
    }

    #[test]
    fn test_file_name_and_extension() {
        let path = VirtualPath::new("dir/archive.tar.gz").unwrap();
        assert_eq!(path.file_name(), "archive.tar.gz");
        assert_eq!(path.extension(), Some("gz"));

        let path = VirtualPath::new(".config").unwrap();
        assert_eq!(path.extension(), None);

        let path = VirtualPath::new("README").unwrap();
        assert_eq!(path.extension(), None);
    }

    #[test]
    fn test_join() {
        let base = VirtualPath::new("maps").unwrap();
        assert_eq!(base.join("e1m1.bsp").unwrap().as_str(), "maps/e1m1.bsp");
        assert_eq!(base.join("../sounds").unwrap().as_str(), "sounds");
        assert!(base.join("../../x").is_err());

        assert_eq!(VirtualPath::root().join("x").unwrap().as_str(), "x");
    }

    #[test]
    fn test_components() {
        let path = VirtualPath::new("a/b/c.txt").unwrap();
        let components: Vec<_> = path.components().collect();
        assert_eq!(components, vec!["a", "b", "c.txt"]);

        assert_eq!(VirtualPath::root().components().count(), 0);
    }

    #[test]
    fn test_strip_prefix() {
        let path = VirtualPath::new("data/textures/wall.png").unwrap();
        let prefix = VirtualPath::new("data").unwrap();
        assert_eq!(path.strip_prefix(&prefix), Some("textures/wall.png"));

        assert_eq!(path.strip_prefix(&path), Some(""));
        assert_eq!(
            path.strip_prefix(&VirtualPath::root()),
            Some("data/textures/wall.png")
        );

        let partial = VirtualPath::new("dat").unwrap();
        assert_eq!(path.strip_prefix(&partial), None);

        let longer = VirtualPath::new("data/textures/wall.png/x").unwrap();
        assert_eq!(path.strip_prefix(&longer), None);
    }

    #[test]
    fn test_starts_with_component_boundary() {
        let path = VirtualPath::new("textures2/a").unwrap();
        assert!(!path.starts_with(&VirtualPath::new("textures").unwrap()));
        assert!(path.starts_with(&VirtualPath::new("textures2").unwrap()));
    }

    #[test]
    fn test_to_native_stays_under_base() {
        let base = Path::new("/srv/game");
        let path = VirtualPath::new("saves/../saves/slot1.sav").unwrap();
        assert_eq!(path.to_native(base), Path::new("/srv/game/saves/slot1.sav"));
    }

    #[test]
    fn test_display_has_leading_slash() {
        let path = VirtualPath::new("a/b").unwrap();
        assert_eq!(path.to_string(), "/a/b");
        assert_eq!(VirtualPath::root().to_string(), "/");
    }

    #[test]
    fn test_hash_consistency() {
        let a = VirtualPath::new("dir/file.txt").unwrap();
        let b = VirtualPath::new("/dir//file.txt").unwrap();
        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_try_from() {
        let path: VirtualPath = "x/y".try_into().unwrap();
        assert_eq!(path.as_str(), "x/y");
        let path: VirtualPath = String::from("x/../z").try_into().unwrap();
        assert_eq!(path.as_str(), "z");
    }
}
