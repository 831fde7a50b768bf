//! Fuzz target for mounting arbitrary bytes as an archive.
//!
//! Every registered format gets a chance to claim the input. If one does,
//! the whole tree is walked and every file read to the end, which exercises
//! index building, decompression and CRC checks on adversarial data.
//!
//! Run with: cargo +nightly fuzz run mount_memory

#![no_main]

use libfuzzer_sys::fuzz_target;
use packfs::{Vfs, VirtualPath};

fn walk(vfs: &Vfs, dir: &VirtualPath, depth: usize) {
    if depth > 32 {
        return;
    }
    let Ok(names) = vfs.list(dir.as_str()) else {
        return;
    };
    for name in names {
        let Ok(path) = dir.join(&name) else {
            continue;
        };
        match vfs.stat(path.as_str()) {
            Ok(meta) if meta.is_dir() => walk(vfs, &path, depth + 1),
            Ok(_) => {
                let _ = vfs.read_to_vec(path.as_str());
            }
            Err(_) => {}
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let vfs = Vfs::new();
    vfs.set_allow_symlinks(true);
    // Errors are fine; panics and hangs are not.
    if vfs.mount_memory(data.to_vec(), "fuzz.bin", "", true).is_ok() {
        walk(&vfs, &VirtualPath::root(), 0);
    }
});
