//! Doom WAD archives.
//!
//! Layout: `"IWAD"` or `"PWAD"`, u32 lump count, u32 directory offset. The
//! directory holds 16-byte records (u32 offset, u32 size, 8-byte NUL-padded
//! name). Lump names are flat and case-insensitive; repeated names (one
//! `THINGS` lump per map) resolve to the first occurrence.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection, read_magic};
use crate::metadata::Metadata;
use crate::source::{Source, fixed_name, le_u32, read_vec_at};
use crate::{Error, Result};
use std::sync::Arc;

const RECORD_SIZE: u64 = 16;

static INFO: FormatInfo = FormatInfo {
    name: "WAD",
    extensions: &["wad"],
    description: "DOOM engine format",
    supports_symlinks: false,
};

/// The WAD format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct WadFormat;

impl ArchiveFormat for WadFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let Some(header) = read_magic::<12>(source)? else {
            return Ok(Detection::NotThisFormat);
        };
        if &header[..4] != b"IWAD" && &header[..4] != b"PWAD" {
            return Ok(Detection::NotThisFormat);
        }
        let count = u64::from(le_u32(&header, 4));
        let dir_offset = u64::from(le_u32(&header, 8));

        let mut src = source.try_clone()?;
        let dir_len = count * RECORD_SIZE;
        if dir_offset + dir_len > src.len()? {
            return Err(Error::corrupt("WAD", "directory past end of file"));
        }
        log::debug!("{}: WAD with {} lumps", name, count);
        let table = read_vec_at(src.as_mut(), dir_offset, dir_len as usize)?;

        let mut archive = UnpackedArchive::new("WAD", src, true)?;
        for record in table.chunks_exact(RECORD_SIZE as usize) {
            let offset = u64::from(le_u32(record, 0));
            let size = u64::from(le_u32(record, 4));
            archive.add_file(&fixed_name(&record[8..16]), Span { offset, size }, Metadata::file(size));
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}
