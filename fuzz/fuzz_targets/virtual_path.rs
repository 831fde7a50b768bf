//! Fuzz target for VirtualPath::new with arbitrary string input.
//!
//! Run with: cargo +nightly fuzz run virtual_path
//!
//! Properties checked on every accepted path:
//! - No `.` or `..` segments survive canonicalization
//! - No leading, trailing or doubled separators
//! - No backslashes, NUL bytes or colons
//! - Canonicalization is idempotent

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(path) = packfs::VirtualPath::new(input) else {
        return;
    };
    let s = path.as_str();

    assert!(
        !s.split('/').any(|seg| seg == "." || seg == ".."),
        "dot segment survived: {:?}",
        s
    );
    assert!(!s.starts_with('/') && !s.ends_with('/'), "stray separator: {:?}", s);
    assert!(!s.contains("//"), "empty segment: {:?}", s);
    assert!(
        !s.contains(['\\', '\0', ':']),
        "forbidden character: {:?}",
        s
    );

    let again = packfs::VirtualPath::new(s).expect("canonical path must re-parse");
    assert_eq!(again.as_str(), s);
});
