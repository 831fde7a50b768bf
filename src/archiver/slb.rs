//! Independence War SLB archives.
//!
//! The format has no signature. Layout: u32 version (always 0), u32 file
//! count, u32 table offset; the table holds 72-byte records of a `\`, a
//! 63-byte NUL-padded backslash-separated path, u32 offset and u32 size.
//! Because there is no magic, a header that fails validation is reported as
//! "not this format" instead of as corruption.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection, read_magic};
use crate::metadata::Metadata;
use crate::source::{Source, fixed_name, le_u32, read_vec_at};
use crate::Result;
use std::sync::Arc;

const RECORD_SIZE: u64 = 72;

static INFO: FormatInfo = FormatInfo {
    name: "SLB",
    extensions: &["slb"],
    description: "Independence War format",
    supports_symlinks: false,
};

/// The SLB format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlbFormat;

impl ArchiveFormat for SlbFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let Some(header) = read_magic::<12>(source)? else {
            return Ok(Detection::NotThisFormat);
        };
        let version = le_u32(&header, 0);
        let count = u64::from(le_u32(&header, 4));
        let table_offset = u64::from(le_u32(&header, 8));
        if version != 0 || count == 0 {
            return Ok(Detection::NotThisFormat);
        }

        let mut src = source.try_clone()?;
        let table_len = count * RECORD_SIZE;
        if table_offset + table_len > src.len()? {
            return Ok(Detection::NotThisFormat);
        }
        let table = read_vec_at(src.as_mut(), table_offset, table_len as usize)?;
        if table.chunks_exact(RECORD_SIZE as usize).any(|r| r[0] != b'\\') {
            return Ok(Detection::NotThisFormat);
        }
        log::debug!("{}: SLB with {} entries", name, count);

        let mut archive = UnpackedArchive::new("SLB", src, true)?;
        for record in table.chunks_exact(RECORD_SIZE as usize) {
            let offset = u64::from(le_u32(record, 64));
            let size = u64::from(le_u32(record, 68));
            archive.add_file(&fixed_name(&record[1..64]), Span { offset, size }, Metadata::file(size));
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}
