//! Descent II movie library (MVL) archives.
//!
//! Layout: `"DMVL"`, u32 file count, then one 17-byte record per file
//! (13-byte NUL-padded name, u32 size). File data follows the table in order.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection, read_magic};
use crate::metadata::Metadata;
use crate::source::{Source, fixed_name, le_u32, read_vec_at};
use crate::{Error, Result};
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"DMVL";
const RECORD_SIZE: u64 = 17;

static INFO: FormatInfo = FormatInfo {
    name: "MVL",
    extensions: &["mvl"],
    description: "Descent II Movielib format",
    supports_symlinks: false,
};

/// The MVL format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct MvlFormat;

impl ArchiveFormat for MvlFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let Some(header) = read_magic::<8>(source)? else {
            return Ok(Detection::NotThisFormat);
        };
        if &header[..4] != MAGIC {
            return Ok(Detection::NotThisFormat);
        }
        let count = u64::from(le_u32(&header, 4));
        log::debug!("{}: MVL with {} entries", name, count);

        let mut src = source.try_clone()?;
        let table_len = count * RECORD_SIZE;
        if 8 + table_len > src.len()? {
            return Err(Error::corrupt("MVL", "file table past end of file"));
        }
        let table = read_vec_at(src.as_mut(), 8, table_len as usize)?;

        let mut archive = UnpackedArchive::new("MVL", src, true)?;
        let mut offset = 8 + table_len;
        for record in table.chunks_exact(RECORD_SIZE as usize) {
            let size = u64::from(le_u32(record, 13));
            archive.add_file(&fixed_name(&record[..13]), Span { offset, size }, Metadata::file(size));
            offset += size;
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::Archive;
    use crate::path::VirtualPath;
    use crate::source::MemorySource;
    use std::io::Read;

    #[test]
    fn test_open_and_read() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        for (name, size) in [("intro.mve", 3u32), ("end.mve", 2)] {
            let mut field = [0u8; 13];
            field[..name.len()].copy_from_slice(name.as_bytes());
            bytes.extend_from_slice(&field);
            bytes.extend_from_slice(&size.to_le_bytes());
        }
        bytes.extend_from_slice(b"abcde");

        let Detection::Claimed(archive) = MvlFormat.open(&MemorySource::new(bytes), "m.mvl").unwrap()
        else {
            panic!("not claimed");
        };
        let mut out = Vec::new();
        archive
            .open_read(&VirtualPath::new("END.MVE").unwrap())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"de");
    }
}
