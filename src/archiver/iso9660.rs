//! ISO9660 CD-ROM images, with Joliet long names when present.
//!
//! Volume descriptors start at sector 16 and run until a terminator (type
//! 255). The primary descriptor points at the root directory record; a Joliet
//! supplementary descriptor, identified by its UCS-2 escape sequence, is
//! preferred because its names keep their case and length.

use super::unpacked::{Span, UnpackedArchive};
use super::{ArchiveFormat, FormatInfo, Detection};
use crate::metadata::Metadata;
use crate::source::{Source, le_u32, read_exact_at, read_vec_at};
use crate::timestamp::Timestamp;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

const SECTOR_SIZE: u64 = 2048;
const FIRST_DESCRIPTOR_SECTOR: u64 = 16;
const STANDARD_ID: &[u8; 5] = b"CD001";

const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_SUPPLEMENTARY: u8 = 2;
const DESCRIPTOR_TERMINATOR: u8 = 255;

const ROOT_RECORD_OFFSET: usize = 156;
const ESCAPE_OFFSET: usize = 88;
const JOLIET_ESCAPES: [&[u8; 3]; 3] = [b"%/@", b"%/C", b"%/E"];

const FLAG_DIRECTORY: u8 = 0x02;

/// Upper bounds for hostile images.
const MAX_DESCRIPTORS: u64 = 64;
const MAX_DEPTH: usize = 64;
const MAX_DIRECTORY_SIZE: u64 = 64 * 1024 * 1024;

static INFO: FormatInfo = FormatInfo {
    name: "ISO",
    extensions: &["iso"],
    description: "ISO9660 image file",
    supports_symlinks: false,
};

/// The ISO9660 format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsoFormat;

/// A decoded directory record.
#[derive(Debug)]
struct DirRecord {
    extent: u64,
    data_len: u64,
    is_dir: bool,
    name: Option<String>,
    recorded: Option<Timestamp>,
}

impl ArchiveFormat for IsoFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let mut src = source.try_clone()?;
        let len = src.len()?;
        if len < (FIRST_DESCRIPTOR_SECTOR + 1) * SECTOR_SIZE {
            return Ok(Detection::NotThisFormat);
        }
        let mut descriptor = [0u8; SECTOR_SIZE as usize];
        read_exact_at(src.as_mut(), FIRST_DESCRIPTOR_SECTOR * SECTOR_SIZE, &mut descriptor)?;
        if &descriptor[1..6] != STANDARD_ID {
            return Ok(Detection::NotThisFormat);
        }

        let mut primary_root = None;
        let mut joliet_root = None;
        let mut sector = FIRST_DESCRIPTOR_SECTOR;
        loop {
            if &descriptor[1..6] != STANDARD_ID {
                return Err(Error::corrupt("ISO", "bad volume descriptor signature"));
            }
            match descriptor[0] {
                DESCRIPTOR_TERMINATOR => break,
                DESCRIPTOR_PRIMARY if primary_root.is_none() => {
                    primary_root = parse_record(&descriptor[ROOT_RECORD_OFFSET..], false)?;
                }
                DESCRIPTOR_SUPPLEMENTARY if joliet_root.is_none() => {
                    let escape = &descriptor[ESCAPE_OFFSET..ESCAPE_OFFSET + 3];
                    if JOLIET_ESCAPES.iter().any(|e| &e[..] == escape) {
                        joliet_root = parse_record(&descriptor[ROOT_RECORD_OFFSET..], true)?;
                    }
                }
                _ => {}
            }
            sector += 1;
            if sector - FIRST_DESCRIPTOR_SECTOR >= MAX_DESCRIPTORS || (sector + 1) * SECTOR_SIZE > len {
                return Err(Error::corrupt("ISO", "missing volume descriptor terminator"));
            }
            read_exact_at(src.as_mut(), sector * SECTOR_SIZE, &mut descriptor)?;
        }

        let joliet = joliet_root.is_some();
        let root = joliet_root
            .or(primary_root)
            .ok_or_else(|| Error::corrupt("ISO", "no primary volume descriptor"))?;
        log::debug!("{}: ISO9660 image (joliet: {})", name, joliet);

        let mut directories = Vec::new();
        collect_tree(src.as_mut(), len, &root, joliet, &mut directories)?;

        let mut archive = UnpackedArchive::new("ISO", src, true)?;
        for (path, record) in directories {
            let meta = if record.is_dir {
                Metadata::directory()
            } else {
                Metadata::file(record.data_len)
            }
            .with_modified(record.recorded);
            if record.is_dir {
                archive.add_dir(&path, meta);
            } else {
                let span = Span {
                    offset: record.extent * SECTOR_SIZE,
                    size: record.data_len,
                };
                archive.add_file(&path, span, meta);
            }
        }
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}

/// Reads every directory reachable from `root`, depth first.
fn collect_tree(
    src: &mut dyn Source,
    len: u64,
    root: &DirRecord,
    joliet: bool,
    out: &mut Vec<(String, DirRecord)>,
) -> Result<()> {
    let mut visited = HashSet::new();
    let mut pending = vec![(root.extent, root.data_len, String::new(), 0usize)];
    while let Some((extent, data_len, prefix, depth)) = pending.pop() {
        if depth > MAX_DEPTH {
            return Err(Error::corrupt("ISO", "directory nesting too deep"));
        }
        if !visited.insert(extent) {
            log::warn!("ISO: directory extent {} visited twice, skipping", extent);
            continue;
        }
        let start = extent * SECTOR_SIZE;
        if data_len > MAX_DIRECTORY_SIZE || start + data_len > len {
            return Err(Error::corrupt(
                "ISO",
                format!("directory at sector {} past end of image", extent),
            ));
        }
        let data = read_vec_at(src, start, data_len as usize)?;

        let mut pos = 0usize;
        while pos < data.len() {
            let record_len = usize::from(data[pos]);
            if record_len == 0 {
                // records never straddle sectors; skip the padding
                pos = (pos / SECTOR_SIZE as usize + 1) * SECTOR_SIZE as usize;
                continue;
            }
            if pos + record_len > data.len() {
                return Err(Error::corrupt("ISO", "directory record past end of extent"));
            }
            let Some(record) = parse_record(&data[pos..pos + record_len], joliet)? else {
                pos += record_len;
                continue;
            };
            pos += record_len;
            let Some(name) = record.name.as_deref() else {
                continue;
            };
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", prefix, name)
            };
            if record.is_dir {
                pending.push((record.extent, record.data_len, path.clone(), depth + 1));
            }
            out.push((path, record));
        }
    }
    Ok(())
}

/// Parses one directory record. Self and parent records get `name: None`.
///
/// Returns `Ok(None)` for records too short to hold their own name.
fn parse_record(raw: &[u8], joliet: bool) -> Result<Option<DirRecord>> {
    if raw.len() < 34 {
        return Err(Error::corrupt("ISO", "directory record too short"));
    }
    let record_len = usize::from(raw[0]);
    let name_len = usize::from(raw[32]);
    if 33 + name_len > raw.len().min(record_len.max(34)) {
        return Ok(None);
    }
    let ext_attr_len = u64::from(raw[1]);
    let extent = u64::from(le_u32(raw, 2)) + ext_attr_len;
    let data_len = u64::from(le_u32(raw, 10));
    let mut date = [0u8; 7];
    date.copy_from_slice(&raw[18..25]);
    let is_dir = raw[25] & FLAG_DIRECTORY != 0;
    let raw_name = &raw[33..33 + name_len];

    let name = match raw_name {
        [0] | [1] => None,
        _ if joliet => Some(clean_name(&decode_ucs2be(raw_name), is_dir)),
        _ => Some(clean_name(&String::from_utf8_lossy(raw_name), is_dir)),
    };

    Ok(Some(DirRecord {
        extent,
        data_len,
        is_dir,
        name,
        recorded: Timestamp::from_iso9660(&date),
    }))
}

/// Strips the `;1` version suffix and a trailing dot from file names.
fn clean_name(name: &str, is_dir: bool) -> String {
    let mut name = name;
    if !is_dir {
        if let Some(pos) = name.rfind(';') {
            name = &name[..pos];
        }
        name = name.strip_suffix('.').unwrap_or(name);
    }
    name.to_string()
}

fn decode_ucs2be(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &[u8], extent: u32, len: u32, dir: bool) -> Vec<u8> {
        let mut rec = vec![0u8; 33];
        rec[2..6].copy_from_slice(&extent.to_le_bytes());
        rec[6..10].copy_from_slice(&extent.to_be_bytes());
        rec[10..14].copy_from_slice(&len.to_le_bytes());
        rec[14..18].copy_from_slice(&len.to_be_bytes());
        rec[18..25].copy_from_slice(&[99, 12, 31, 23, 59, 0, 0]);
        rec[25] = if dir { FLAG_DIRECTORY } else { 0 };
        rec[32] = name.len() as u8;
        rec.extend_from_slice(name);
        if rec.len() % 2 == 1 {
            rec.push(0);
        }
        rec[0] = rec.len() as u8;
        rec
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("README.TXT;1", false), "README.TXT");
        assert_eq!(clean_name("MAKEFILE.;1", false), "MAKEFILE");
        assert_eq!(clean_name("DIR.D", true), "DIR.D");
    }

    #[test]
    fn test_decode_ucs2be() {
        assert_eq!(decode_ucs2be(&[0, b'H', 0, b'i', 0x00, 0xE9]), "Hié");
    }

    #[test]
    fn test_parse_file_record() {
        let raw = record(b"GAME.DAT;1", 30, 1234, false);
        let rec = parse_record(&raw, false).unwrap().unwrap();
        assert_eq!(rec.extent, 30);
        assert_eq!(rec.data_len, 1234);
        assert!(!rec.is_dir);
        assert_eq!(rec.name.as_deref(), Some("GAME.DAT"));
        assert_eq!(rec.recorded.unwrap().as_unix_secs(), 946684740);
    }

    #[test]
    fn test_self_and_parent_records_unnamed() {
        let rec = parse_record(&record(&[0], 20, 2048, true), false).unwrap().unwrap();
        assert!(rec.name.is_none());
        let rec = parse_record(&record(&[1], 20, 2048, true), false).unwrap().unwrap();
        assert!(rec.name.is_none());
    }

    #[test]
    fn test_parse_joliet_record() {
        let name: Vec<u8> = "Long Name.txt;1"
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect();
        let rec = parse_record(&record(&name, 40, 5, false), true).unwrap().unwrap();
        assert_eq!(rec.name.as_deref(), Some("Long Name.txt"));
    }
}
