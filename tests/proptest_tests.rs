//! Property-based tests using proptest.
//!
//! These check path canonicalization and lookup invariants against
//! randomly generated inputs.

use packfs::{Error, Vfs, VirtualPath};
use proptest::prelude::*;

mod common;

/// Strategy for generating path segments that survive canonicalization.
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,9}".prop_filter("dot segments collapse", |s| {
        s != "." && s != ".."
    })
}

/// Strategy for canonical relative paths of one to four segments.
fn canonical_path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(segment_strategy(), 1..5).prop_map(|parts| parts.join("/"))
}

/// Strategy for noisy spellings of a path: doubled and leading separators,
/// backslashes and `.` segments.
fn noise_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("/"), Just("//"), Just("\\"), Just("/./"), Just("\\.\\")]
}

proptest! {
    /// Canonical paths are returned unchanged.
    #[test]
    fn canonical_paths_unchanged(path in canonical_path_strategy()) {
        let parsed = VirtualPath::new(&path).unwrap();
        prop_assert_eq!(parsed.as_str(), path.as_str());
    }

    /// Separator noise never changes the canonical form.
    #[test]
    fn separator_noise_ignored(
        parts in proptest::collection::vec(segment_strategy(), 1..5),
        seps in proptest::collection::vec(noise_strategy(), 5),
    ) {
        let mut noisy = String::from(seps[0]);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                noisy.push_str(seps[i % seps.len()]);
            }
            noisy.push_str(part);
        }
        noisy.push_str(seps[4]);
        let parsed = VirtualPath::new(&noisy).unwrap();
        prop_assert_eq!(parsed.as_str(), parts.join("/"));
    }

    /// Canonicalization is idempotent.
    #[test]
    fn canonicalize_idempotent(path in "[a-z/\\\\.]{0,30}") {
        if let Ok(once) = VirtualPath::new(&path) {
            let twice = VirtualPath::new(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    /// A `..` for every segment plus one always escapes the root.
    #[test]
    fn excess_parent_segments_rejected(path in canonical_path_strategy()) {
        let depth = path.split('/').count();
        let escape = format!("{}/{}", path, vec![".."; depth + 1].join("/"));
        let err = VirtualPath::new(&escape).unwrap_err();
        prop_assert!(matches!(err, Error::PathTraversalRejected { .. }), "expected PathTraversalRejected, got {:?}", err);

        let back_to_root = format!("{}/{}", path, vec![".."; depth].join("/"));
        prop_assert!(VirtualPath::new(&back_to_root).unwrap().is_root());
    }

    /// NUL bytes are rejected wherever they appear.
    #[test]
    fn nul_bytes_rejected(prefix in "[a-z]{0,5}", suffix in "[a-z]{0,5}") {
        let path = format!("{}\0{}", prefix, suffix);
        prop_assert!(matches!(
            VirtualPath::new(&path),
            Err(Error::InvalidPath { .. })
        ), "expected InvalidPath");
    }

    /// Joining a child and taking the parent gets back where it started.
    #[test]
    fn join_then_parent(base in canonical_path_strategy(), child in segment_strategy()) {
        let base = VirtualPath::new(&base).unwrap();
        let joined = base.join(&child).unwrap();
        prop_assert_eq!(joined.file_name(), child.as_str());
        prop_assert_eq!(joined.parent(), Some(base.clone()));
        prop_assert!(joined.starts_with(&base));
        prop_assert_eq!(joined.strip_prefix(&base), Some(child.as_str()));
    }

    /// Whatever a mounted archive holds, every listed name can be opened.
    #[test]
    fn listed_names_resolve(
        names in proptest::collection::btree_set("[A-Z][A-Z0-9]{0,7}", 1..6),
    ) {
        let owned: Vec<(String, Vec<u8>)> = names
            .iter()
            .map(|n| (n.clone(), n.as_bytes().to_vec()))
            .collect();
        let files: Vec<(&str, &[u8])> = owned
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        let vfs = Vfs::new();
        vfs.mount_memory(common::wad(&files), "fuzz.wad", "", true).unwrap();

        let listed = vfs.list("").unwrap();
        prop_assert_eq!(listed.len(), names.len());
        for name in listed {
            prop_assert_eq!(vfs.read_to_vec(&name).unwrap(), name.as_bytes());
        }
    }
}
