//! Descent HOG archives.
//!
//! Two layouts share the `.hog` extension:
//!
//! - **DHF** (Descent I/II): `"DHF"` followed by repeated records of a 13-byte
//!   NUL-padded name, a u32 size and the file data, up to end of file.
//! - **HOG2** (Descent 3): `"HOG2"`, u32 file count, u32 data offset and 56
//!   reserved bytes, then 48-byte records (36-byte name, u32 flags, u32 size,
//!   u32 Unix timestamp). Data starts at the data offset, in record order.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection, read_magic};
use crate::metadata::Metadata;
use crate::source::{Source, fixed_name, le_u32, read_exact_at, read_vec_at};
use crate::timestamp::Timestamp;
use crate::{Error, Result};
use std::sync::Arc;

const DHF_MAGIC: &[u8; 3] = b"DHF";
const DHF_RECORD_HEADER: u64 = 17;
const HOG2_MAGIC: &[u8; 4] = b"HOG2";
const HOG2_HEADER_SIZE: u64 = 68;
const HOG2_RECORD_SIZE: u64 = 48;

static INFO: FormatInfo = FormatInfo {
    name: "HOG",
    extensions: &["hog"],
    description: "Descent I/II/III HOG file format",
    supports_symlinks: false,
};

/// The HOG format plugin (DHF and HOG2).
#[derive(Debug, Default, Clone, Copy)]
pub struct HogFormat;

impl ArchiveFormat for HogFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let Some(magic) = read_magic::<3>(source)? else {
            return Ok(Detection::NotThisFormat);
        };
        if &magic == DHF_MAGIC {
            log::debug!("{}: HOG (DHF)", name);
            return open_dhf(source);
        }
        match read_magic::<4>(source)? {
            Some(magic) if &magic == HOG2_MAGIC => {
                log::debug!("{}: HOG2", name);
                open_hog2(source)
            }
            _ => Ok(Detection::NotThisFormat),
        }
    }
}

fn open_dhf(source: &dyn Source) -> Result<Detection> {
    let mut src = source.try_clone()?;
    let len = src.len()?;
    let mut entries = Vec::new();
    let mut pos = DHF_MAGIC.len() as u64;
    while pos < len {
        if pos + DHF_RECORD_HEADER > len {
            return Err(Error::corrupt("HOG", "truncated file header"));
        }
        let mut header = [0u8; DHF_RECORD_HEADER as usize];
        read_exact_at(src.as_mut(), pos, &mut header)?;
        let size = u64::from(le_u32(&header, 13));
        let offset = pos + DHF_RECORD_HEADER;
        entries.push((fixed_name(&header[..13]), Span { offset, size }));
        pos = offset + size;
    }

    let mut archive = UnpackedArchive::new("HOG", src, true)?;
    for (entry_name, span) in entries {
        archive.add_file(&entry_name, span, Metadata::file(span.size));
    }
    Ok(Detection::Claimed(Arc::new(archive)))
}

fn open_hog2(source: &dyn Source) -> Result<Detection> {
    let mut src = source.try_clone()?;
    let len = src.len()?;
    if len < HOG2_HEADER_SIZE {
        return Err(Error::corrupt("HOG", "truncated HOG2 header"));
    }
    let mut header = [0u8; 12];
    read_exact_at(src.as_mut(), 0, &mut header)?;
    let count = u64::from(le_u32(&header, 4));
    let data_offset = u64::from(le_u32(&header, 8));

    let table_len = count * HOG2_RECORD_SIZE;
    if HOG2_HEADER_SIZE + table_len > len {
        return Err(Error::corrupt("HOG", "HOG2 file table past end of file"));
    }
    let table = read_vec_at(src.as_mut(), HOG2_HEADER_SIZE, table_len as usize)?;

    let mut archive = UnpackedArchive::new("HOG", src, true)?;
    let mut offset = data_offset;
    for record in table.chunks_exact(HOG2_RECORD_SIZE as usize) {
        let size = u64::from(le_u32(record, 40));
        let mtime = Timestamp::from_unix_secs(i64::from(le_u32(record, 44)));
        archive.add_file(
            &fixed_name(&record[..36]),
            Span { offset, size },
            Metadata::file(size).with_modified(mtime),
        );
        offset += size;
    }
    Ok(Detection::Claimed(Arc::new(archive)))
}
