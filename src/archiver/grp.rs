//! Build engine GRP archives (Duke Nukem 3D, Shadow Warrior, Blood).
//!
//! Layout: `"KenSilverman"`, u32 file count, then one 16-byte record per file
//! (12-byte NUL-padded name, u32 size). File data follows the table, in table
//! order.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection, read_magic};
use crate::metadata::Metadata;
use crate::source::{Source, fixed_name, le_u32, read_vec_at};
use crate::{Error, Result};
use std::sync::Arc;

const MAGIC: &[u8; 12] = b"KenSilverman";
const RECORD_SIZE: u64 = 16;

static INFO: FormatInfo = FormatInfo {
    name: "GRP",
    extensions: &["grp"],
    description: "Build engine Groupfile format",
    supports_symlinks: false,
};

/// The GRP format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrpFormat;

impl ArchiveFormat for GrpFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let Some(header) = read_magic::<16>(source)? else {
            return Ok(Detection::NotThisFormat);
        };
        if &header[..12] != MAGIC {
            return Ok(Detection::NotThisFormat);
        }
        let count = u64::from(le_u32(&header, 12));
        log::debug!("{}: GRP with {} entries", name, count);

        let mut src = source.try_clone()?;
        let len = src.len()?;
        let table_len = count * RECORD_SIZE;
        if 16 + table_len > len {
            return Err(Error::corrupt("GRP", "file table past end of file"));
        }
        let table = read_vec_at(src.as_mut(), 16, table_len as usize)?;

        let mut archive = UnpackedArchive::new("GRP", src, true)?;
        let mut offset = 16 + table_len;
        for record in table.chunks_exact(RECORD_SIZE as usize) {
            let entry_name = fixed_name(&record[..12]);
            let size = u64::from(le_u32(record, 12));
            archive.add_file(&entry_name, Span { offset, size }, Metadata::file(size));
            offset += size;
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}
