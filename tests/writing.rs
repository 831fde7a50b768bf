//! The write directory: creating, appending, deleting.

use packfs::{Error, OpenMode, Vfs};
use std::fs;
use tempfile::TempDir;

mod common;

fn writable() -> (TempDir, Vfs) {
    let tmp = TempDir::new().unwrap();
    let vfs = Vfs::new();
    vfs.mount_write_dir(tmp.path(), "").unwrap();
    (tmp, vfs)
}

#[test]
fn test_no_write_dir() {
    let vfs = Vfs::new();
    vfs.mount_memory(common::grp(&[("A", b"a")]), "a.grp", "", true)
        .unwrap();
    assert!(matches!(vfs.open_write("new.txt"), Err(Error::NoWriteDir)));
    assert!(matches!(vfs.mkdir("dir"), Err(Error::NoWriteDir)));
    assert!(matches!(vfs.delete("A"), Err(Error::NoWriteDir)));
}

#[test]
fn test_archive_cannot_be_write_dir() {
    let vfs = Vfs::new();
    vfs.mount_memory(common::grp(&[("A", b"a")]), "a.grp", "", true)
        .unwrap();
    assert!(matches!(
        vfs.set_write_dir("a.grp"),
        Err(Error::PermissionDenied { .. })
    ));
    assert!(matches!(
        vfs.set_write_dir("missing"),
        Err(Error::NotMounted { .. })
    ));
}

#[test]
fn test_written_file_visible_immediately() {
    let (tmp, vfs) = writable();
    let mut file = vfs.open_write("notes.txt").unwrap();
    file.set_buffer(64).unwrap();
    file.write(b"first line\n").unwrap();
    assert_eq!(file.length().unwrap(), 11);
    file.close().unwrap();

    assert_eq!(vfs.read_to_vec("notes.txt").unwrap(), b"first line\n");
    assert_eq!(fs::read(tmp.path().join("notes.txt")).unwrap(), b"first line\n");
    assert_eq!(vfs.real_dir("notes.txt").unwrap(), vfs.write_dir());
}

#[test]
fn test_write_shadows_archive() {
    let (_tmp, vfs) = writable();
    vfs.mount_memory(common::grp(&[("CONFIG.CFG", b"defaults")]), "base.grp", "", true)
        .unwrap();
    assert_eq!(vfs.read_to_vec("CONFIG.CFG").unwrap(), b"defaults");

    let mut file = vfs.open_write("CONFIG.CFG").unwrap();
    file.write(b"custom").unwrap();
    file.close().unwrap();
    assert_eq!(vfs.read_to_vec("CONFIG.CFG").unwrap(), b"custom");

    vfs.delete("CONFIG.CFG").unwrap();
    assert_eq!(vfs.read_to_vec("CONFIG.CFG").unwrap(), b"defaults");
}

#[test]
fn test_append() {
    let (_tmp, vfs) = writable();
    let mut file = vfs.open_write("log.txt").unwrap();
    file.write(b"one ").unwrap();
    file.close().unwrap();

    let mut file = vfs.open_append("log.txt").unwrap();
    assert_eq!(file.mode(), Some(OpenMode::Append));
    assert_eq!(file.tell().unwrap(), 4);
    file.write(b"two").unwrap();
    file.close().unwrap();
    assert_eq!(vfs.read_to_vec("log.txt").unwrap(), b"one two");
}

#[test]
fn test_write_seek_past_end_zero_fills() {
    let (_tmp, vfs) = writable();
    let mut file = vfs.open_write("sparse.bin").unwrap();
    file.seek(4).unwrap();
    file.write(b"z").unwrap();
    file.close().unwrap();
    assert_eq!(vfs.read_to_vec("sparse.bin").unwrap(), [0, 0, 0, 0, b'z']);
}

#[test]
fn test_endian_writers() {
    let (_tmp, vfs) = writable();
    let mut file = vfs.open_write("header.bin").unwrap();
    file.write_u32_le(0xDEAD_BEEF).unwrap();
    file.write_i16_be(-2).unwrap();
    file.close().unwrap();
    assert_eq!(
        vfs.read_to_vec("header.bin").unwrap(),
        [0xEF, 0xBE, 0xAD, 0xDE, 0xFF, 0xFE]
    );

    let mut file = vfs.open_read("header.bin").unwrap();
    assert_eq!(file.read_u32_le().unwrap(), 0xDEAD_BEEF);
    assert_eq!(file.read_i16_be().unwrap(), -2);
}

#[test]
fn test_mkdir_and_delete() {
    let (tmp, vfs) = writable();
    vfs.mkdir("saves/slot1").unwrap();
    assert!(tmp.path().join("saves/slot1").is_dir());
    assert!(vfs.stat("saves/slot1").unwrap().is_dir());

    let mut file = vfs.open_write("saves/slot1/game.sav").unwrap();
    file.write(b"x").unwrap();
    file.close().unwrap();

    assert!(matches!(
        vfs.delete("saves/slot1"),
        Err(Error::DirectoryNotEmpty { .. })
    ));
    vfs.delete("saves/slot1/game.sav").unwrap();
    vfs.delete("saves/slot1").unwrap();
    assert!(!vfs.exists("saves/slot1"));
    assert!(vfs.delete("saves/slot1").unwrap_err().is_not_found());
}

#[test]
fn test_write_outside_write_mount_point() {
    let tmp = TempDir::new().unwrap();
    let vfs = Vfs::new();
    vfs.mount_write_dir(tmp.path(), "user").unwrap();
    assert!(matches!(
        vfs.open_write("elsewhere.txt"),
        Err(Error::PermissionDenied { .. })
    ));
    let mut file = vfs.open_write("user/ok.txt").unwrap();
    file.write(b"ok").unwrap();
    file.close().unwrap();
    assert_eq!(fs::read(tmp.path().join("ok.txt")).unwrap(), b"ok");
}

#[test]
fn test_write_dir_busy_while_writing() {
    let (_tmp, vfs) = writable();
    let other = TempDir::new().unwrap();
    vfs.mount(other.path(), "other", true).unwrap();
    let other_name = other.path().to_string_lossy().into_owned();

    let file = vfs.open_write("open.txt").unwrap();
    assert!(matches!(
        vfs.set_write_dir(&other_name),
        Err(Error::Busy { open_files: 1 })
    ));
    assert!(matches!(vfs.clear_write_dir(), Err(Error::Busy { .. })));
    drop(file);

    vfs.set_write_dir(&other_name).unwrap();
    assert_eq!(vfs.write_dir_path().as_deref(), Some(other.path()));
    vfs.clear_write_dir().unwrap();
    assert_eq!(vfs.write_dir(), None);
}

#[test]
fn test_unmount_write_dir_drops_buffered_data() {
    let (tmp, vfs) = writable();
    let name = tmp.path().to_string_lossy().into_owned();
    let mut file = vfs.open_write("pending.txt").unwrap();
    file.set_buffer(1024).unwrap();
    file.write(b"never flushed").unwrap();

    vfs.unmount(&name).unwrap();
    assert_eq!(vfs.write_dir(), None);
    assert!(matches!(
        file.write(b"more"),
        Err(Error::HandleInvalidated { .. })
    ));
    file.close().unwrap();
    assert_eq!(fs::read(tmp.path().join("pending.txt")).unwrap(), b"");
}
