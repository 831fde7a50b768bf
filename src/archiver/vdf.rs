//! Gothic I/II VDF archives.
//!
//! Layout: a 256-byte comment, a 16-byte signature, then six u32 fields
//! (entry count, file count, MS-DOS timestamp, data size, catalog offset,
//! version `0x50`). The catalog is an array of 80-byte records: a 64-byte
//! space-padded name, u32 offset (or first child index for directories), u32
//! size, u32 type and u32 attributes. Type bit `0x80000000` marks a directory,
//! bit `0x40000000` the last record of its directory. Lookups are
//! case-insensitive and every entry carries the archive timestamp.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection};
use crate::metadata::Metadata;
use crate::source::{Source, le_u32, read_exact_at, read_vec_at};
use crate::timestamp::Timestamp;
use crate::{Error, Result};
use std::sync::Arc;

const COMMENT_SIZE: u64 = 256;
const SIGNATURE_SIZE: usize = 16;
const HEADER_SIZE: u64 = COMMENT_SIZE + SIGNATURE_SIZE as u64 + 24;
const RECORD_SIZE: u64 = 80;
const NAME_SIZE: usize = 64;

const SIGNATURE_G1: &[u8; SIGNATURE_SIZE] = b"PSVDSC_V2.00\r\n\r\n";
const SIGNATURE_G2: &[u8; SIGNATURE_SIZE] = b"PSVDSC_V2.00\n\r\n\r";
const VERSION: u32 = 0x50;

const TYPE_DIRECTORY: u32 = 0x8000_0000;
const TYPE_LAST: u32 = 0x4000_0000;

/// Catalogs nest directories by index; anything deeper is a cycle.
const MAX_DEPTH: usize = 64;

static INFO: FormatInfo = FormatInfo {
    name: "VDF",
    extensions: &["vdf"],
    description: "Gothic I/II engine format",
    supports_symlinks: false,
};

/// The VDF format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct VdfFormat;

impl ArchiveFormat for VdfFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let mut src = source.try_clone()?;
        let len = src.len()?;
        if len < HEADER_SIZE {
            return Ok(Detection::NotThisFormat);
        }
        let mut header = [0u8; SIGNATURE_SIZE + 24];
        read_exact_at(src.as_mut(), COMMENT_SIZE, &mut header)?;
        let signature = &header[..SIGNATURE_SIZE];
        if signature != SIGNATURE_G1 && signature != SIGNATURE_G2 {
            return Ok(Detection::NotThisFormat);
        }

        let fields = &header[SIGNATURE_SIZE..];
        let entry_count = le_u32(fields, 0);
        let timestamp = Timestamp::from_dos_u32(le_u32(fields, 8));
        let catalog_offset = u64::from(le_u32(fields, 16));
        let version = le_u32(fields, 20);
        if version != VERSION {
            return Err(Error::corrupt(
                "VDF",
                format!("unsupported version {:#x}", version),
            ));
        }
        let catalog_len = u64::from(entry_count) * RECORD_SIZE;
        if catalog_offset + catalog_len > len {
            return Err(Error::corrupt("VDF", "catalog past end of file"));
        }
        log::debug!("{}: VDF with {} catalog entries", name, entry_count);
        let catalog = read_vec_at(src.as_mut(), catalog_offset, catalog_len as usize)?;

        let mut archive = UnpackedArchive::new("VDF", src, true)?;
        if entry_count > 0 {
            index_catalog(&mut archive, &catalog, entry_count, timestamp)?;
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}

/// Walks the catalog from record 0, following directory child indices.
fn index_catalog(
    archive: &mut UnpackedArchive,
    catalog: &[u8],
    entry_count: u32,
    timestamp: Option<Timestamp>,
) -> Result<()> {
    // (first record index, directory prefix, depth)
    let mut pending = vec![(0u32, String::new(), 0usize)];
    while let Some((first, prefix, depth)) = pending.pop() {
        if depth > MAX_DEPTH {
            return Err(Error::corrupt("VDF", "directory nesting too deep"));
        }
        let mut index = first;
        loop {
            if index >= entry_count {
                return Err(Error::corrupt(
                    "VDF",
                    format!("catalog index {} out of range", index),
                ));
            }
            let at = index as usize * RECORD_SIZE as usize;
            let record = &catalog[at..at + RECORD_SIZE as usize];
            let entry_name = record_name(&record[..NAME_SIZE]);
            let offset = le_u32(record, 64);
            let size = u64::from(le_u32(record, 68));
            let kind = le_u32(record, 72);
            let path = if prefix.is_empty() {
                entry_name
            } else {
                format!("{}/{}", prefix, entry_name)
            };

            if kind & TYPE_DIRECTORY != 0 {
                archive.add_dir(&path, Metadata::directory().with_modified(timestamp));
                pending.push((offset, path, depth + 1));
            } else {
                let span = Span {
                    offset: u64::from(offset),
                    size,
                };
                archive.add_file(&path, span, Metadata::file(size).with_modified(timestamp));
            }

            if kind & TYPE_LAST != 0 {
                break;
            }
            index += 1;
        }
    }
    Ok(())
}

/// Decodes a space-padded catalog name.
fn record_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
        .trim_end_matches(' ')
        .to_string()
}
