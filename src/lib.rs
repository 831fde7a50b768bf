//! # packfs
//!
//! A virtual filesystem over game archives and native directories.
//!
//! Applications mount archives (zip, 7z, wad, hog, grp, mvl, qpak, slb,
//! iso9660, vdf) and host directories into one namespace, read files through
//! it without caring where they live, and write into a single designated
//! write directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use packfs::{Result, Vfs};
//!
//! fn main() -> Result<()> {
//!     let vfs = Vfs::new();
//!
//!     // Base data at the lowest precedence, a patch above it.
//!     vfs.mount("data/base.pk3", "", true)?;
//!     vfs.mount("data/patch.zip", "", false)?;
//!
//!     // Reads come from the first mount that has the file.
//!     let level = vfs.read_to_vec("maps/e1m1.bsp")?;
//!     println!("{} bytes from {:?}", level.len(), vfs.real_dir("maps/e1m1.bsp")?);
//!
//!     // Directory listings merge every mount.
//!     for name in vfs.list("maps")? {
//!         println!("{}", name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Writing
//!
//! Exactly one mounted native directory can be the write target. Writes
//! outside it fail with [`Error::PermissionDenied`]; new files are visible to
//! lookups immediately.
//!
//! ```rust,no_run
//! use packfs::{Result, Vfs};
//!
//! fn save(vfs: &Vfs, slot: u32, state: &[u8]) -> Result<()> {
//!     vfs.mkdir("saves")?;
//!     let mut file = vfs.open_write(&format!("saves/slot{}.sav", slot))?;
//!     file.write_u32_le(state.len() as u32)?;
//!     file.write(state)?;
//!     file.close()
//! }
//! ```
//!
//! ## Paths
//!
//! Virtual paths use `/` or `\` as separators and are always relative to the
//! virtual root. `.` and `..` segments are collapsed; climbing above the root
//! fails with [`Error::PathTraversalRejected`]. See [`VirtualPath`].
//!
//! ## Handles and unmounting
//!
//! Each [`File`] owns its own cursor over its own stream. Unmounting a source
//! never waits for open files; their next operation fails with
//! [`Error::HandleInvalidated`] instead.
//!
//! ## Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade: mounts,
//! format detection and write-directory changes at `debug`, index building at
//! `trace`, skipped entries at `warn`. It never installs a logger.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod archiver;
pub mod codec;
pub mod config;
pub mod dirtree;
pub mod error;
pub mod file;
pub mod metadata;
pub mod path;
pub mod source;
pub mod timestamp;
pub mod vfs;

mod mount;
mod sync;

pub use archiver::{Archive, ArchiveFormat, Detection, FormatInfo, StreamSource, builtin_formats};
pub use config::{Config, SearchPathEntry};
pub use error::{Error, Result};
pub use file::{File, OpenMode};
pub use metadata::{FileType, Metadata};
pub use path::VirtualPath;
pub use source::{FileSource, MemorySource, ReadStream, Source, WriteStream};
pub use timestamp::Timestamp;
pub use vfs::{Entry, Vfs};
