//! Quake I/II PAK archives.
//!
//! Layout: `"PACK"`, u32 directory offset, u32 directory length. The
//! directory holds 64-byte records (56-byte NUL-padded path, u32 offset,
//! u32 size). Paths use `/` for subdirectories and are case-sensitive.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection, read_magic};
use crate::metadata::Metadata;
use crate::source::{Source, fixed_name, le_u32, read_vec_at};
use crate::{Error, Result};
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"PACK";
const RECORD_SIZE: u64 = 64;

static INFO: FormatInfo = FormatInfo {
    name: "PAK",
    extensions: &["pak"],
    description: "Quake I/II format",
    supports_symlinks: false,
};

/// The Quake PAK format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct QpakFormat;

impl ArchiveFormat for QpakFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let Some(header) = read_magic::<12>(source)? else {
            return Ok(Detection::NotThisFormat);
        };
        if &header[..4] != MAGIC {
            return Ok(Detection::NotThisFormat);
        }
        let dir_offset = u64::from(le_u32(&header, 4));
        let dir_len = u64::from(le_u32(&header, 8));
        if dir_len % RECORD_SIZE != 0 {
            return Err(Error::corrupt(
                "PAK",
                format!("directory length {} is not a multiple of 64", dir_len),
            ));
        }

        let mut src = source.try_clone()?;
        if dir_offset + dir_len > src.len()? {
            return Err(Error::corrupt("PAK", "directory past end of file"));
        }
        log::debug!("{}: PAK with {} entries", name, dir_len / RECORD_SIZE);
        let table = read_vec_at(src.as_mut(), dir_offset, dir_len as usize)?;

        let mut archive = UnpackedArchive::new("PAK", src, false)?;
        for record in table.chunks_exact(RECORD_SIZE as usize) {
            let offset = u64::from(le_u32(record, 56));
            let size = u64::from(le_u32(record, 60));
            archive.add_file(&fixed_name(&record[..56]), Span { offset, size }, Metadata::file(size));
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}
