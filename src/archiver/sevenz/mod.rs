//! 7z archives.
//!
//! A 7z file starts with a 32-byte signature header pointing at the "next
//! header" near the end of the file, which may itself be compressed (an
//! encoded header). File data lives in folders: runs of packed bytes decoded
//! by a chain of coders, each producing one or more files back to back.
//!
//! Solid folders cannot be entered in the middle, so a folder is decoded in
//! full the first time any of its files is opened and kept in a small LRU
//! cache. Opening the next file of the same folder is then a memory copy.

mod header;

use super::{Archive, ArchiveFormat, FormatInfo, Detection};
use crate::codec;
use crate::dirtree::DirTree;
use crate::metadata::Metadata;
use crate::path::VirtualPath;
use crate::source::{MemorySource, ReadStream, SliceStream, Source, le_u32, le_u64, read_exact_at, read_vec_at};
use crate::sync::lock_or_recover;
use crate::{Error, Result};
use header::{HeaderReader, StreamsInfo, property_id};
use lru::LruCache;
use std::io::Read;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

const SIGNATURE: &[u8; 6] = b"7z\xBC\xAF\x27\x1C";
const SIGNATURE_HEADER_SIZE: u64 = 32;
const FORMAT: &str = "7z";

/// Default number of decoded folders kept per archive.
pub const DEFAULT_CACHE_FOLDERS: usize = 4;

/// Headers larger than this are treated as corrupt.
const MAX_HEADER_SIZE: u64 = 64 * 1024 * 1024;
/// Encoded headers may nest; real archives use one level.
const MAX_HEADER_NESTING: usize = 4;

static INFO: FormatInfo = FormatInfo {
    name: FORMAT,
    extensions: &["7z"],
    description: "7zip/LZMA archives",
    supports_symlinks: false,
};

/// The 7z format plugin.
#[derive(Debug, Clone, Copy)]
pub struct SevenZFormat {
    cache_folders: NonZeroUsize,
}

impl SevenZFormat {
    /// Creates the plugin with a folder cache of `folders` entries per
    /// archive (at least one).
    pub fn with_cache_folders(folders: usize) -> Self {
        Self {
            cache_folders: NonZeroUsize::new(folders).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl Default for SevenZFormat {
    fn default() -> Self {
        Self::with_cache_folders(DEFAULT_CACHE_FOLDERS)
    }
}

impl ArchiveFormat for SevenZFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let mut src = source.try_clone()?;
        let len = src.len()?;
        if len < SIGNATURE_HEADER_SIZE {
            return Ok(Detection::NotThisFormat);
        }
        let mut start = [0u8; SIGNATURE_HEADER_SIZE as usize];
        read_exact_at(src.as_mut(), 0, &mut start)?;
        if &start[..6] != SIGNATURE {
            return Ok(Detection::NotThisFormat);
        }

        let stored_crc = le_u32(&start, 8);
        if crc32fast::hash(&start[12..32]) != stored_crc {
            return Err(Error::corrupt(FORMAT, "start header CRC mismatch"));
        }
        let next_offset = le_u64(&start, 12);
        let next_size = le_u64(&start, 20);
        let next_crc = le_u32(&start, 28);
        log::debug!(
            "{}: 7z version {}.{}, next header {} bytes at {}",
            name,
            start[6],
            start[7],
            next_size,
            next_offset
        );

        let header = if next_size == 0 {
            header::Header::default()
        } else {
            let position = SIGNATURE_HEADER_SIZE
                .checked_add(next_offset)
                .filter(|p| p.checked_add(next_size).is_some_and(|end| end <= len))
                .ok_or_else(|| Error::corrupt(FORMAT, "next header past end of file"))?;
            if next_size > MAX_HEADER_SIZE {
                return Err(Error::corrupt(FORMAT, "next header too large"));
            }
            let raw = read_vec_at(src.as_mut(), position, next_size as usize)?;
            if crc32fast::hash(&raw) != next_crc {
                return Err(Error::corrupt(FORMAT, "next header CRC mismatch"));
            }
            read_header(src.as_ref(), len, raw)?
        };

        let archive = SevenZArchive::index(src, len, header, self.cache_folders)?;
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}

/// Parses the next header, decoding encoded headers first.
fn read_header(source: &dyn Source, len: u64, mut raw: Vec<u8>) -> Result<header::Header> {
    for _ in 0..MAX_HEADER_NESTING {
        let mut r = HeaderReader::new(&raw);
        match r.u8()? {
            property_id::HEADER => return header::parse_header(&mut r),
            property_id::ENCODED_HEADER => {
                let streams = header::parse_streams_info(&mut r)?;
                if streams.folders.is_empty() {
                    return Err(Error::corrupt(FORMAT, "encoded header without folders"));
                }
                log::trace!("7z: decoding encoded header");
                let decoded = decode_folder(source, len, &streams, 0, MAX_HEADER_SIZE)?;
                raw = decoded;
            }
            other => {
                return Err(Error::corrupt(
                    FORMAT,
                    format!("unexpected header type {:#04x}", other),
                ));
            }
        }
    }
    Err(Error::corrupt(FORMAT, "encoded headers nested too deeply"))
}

/// Decodes one whole folder into memory and checks its CRC.
fn decode_folder(
    source: &dyn Source,
    len: u64,
    streams: &StreamsInfo,
    index: usize,
    limit: u64,
) -> Result<Vec<u8>> {
    let folder = &streams.folders[index];
    let (pack_offset, pack_size) = streams.pack_range(index)?;
    let start = SIGNATURE_HEADER_SIZE
        .checked_add(pack_offset)
        .filter(|s| s.checked_add(pack_size).is_some_and(|end| end <= len))
        .ok_or_else(|| Error::corrupt(FORMAT, "packed stream past end of file"))?;
    let unpack_size = folder.unpack_size();
    if unpack_size > limit {
        return Err(Error::corrupt(
            FORMAT,
            format!("folder of {} bytes exceeds limit", unpack_size),
        ));
    }
    let capacity = usize::try_from(unpack_size)
        .map_err(|_| Error::corrupt(FORMAT, "folder too large for this platform"))?;

    let (methods, sizes) = folder.methods()?;
    let packed = SliceStream::new(source.try_clone()?, start, pack_size);
    let decoder = codec::build_decoder_chain(packed, &methods, &sizes, FORMAT)?;

    let mut out = Vec::new();
    out.try_reserve_exact(capacity)
        .map_err(|_| Error::corrupt(FORMAT, "not enough memory for folder"))?;
    decoder.take(unpack_size).read_to_end(&mut out)?;
    if out.len() as u64 != unpack_size {
        return Err(Error::corrupt(
            FORMAT,
            format!("folder {} decoded to {} of {} bytes", index, out.len(), unpack_size),
        ));
    }
    if let Some(expected) = folder.unpack_crc {
        let actual = crc32fast::hash(&out);
        if actual != expected {
            return Err(Error::CrcMismatch {
                path: format!("<folder {}>", index),
                expected,
                actual,
            });
        }
    }
    Ok(out)
}

/// Where a file's bytes are found once its folder is decoded.
#[derive(Debug, Clone, Copy)]
struct EntryLocation {
    /// `None` for empty files.
    folder: Option<usize>,
    offset: u64,
    size: u64,
    crc: Option<u32>,
}

/// An opened 7z archive.
pub struct SevenZArchive {
    source: Mutex<Box<dyn Source>>,
    source_len: u64,
    streams: StreamsInfo,
    tree: DirTree<EntryLocation>,
    cache: Mutex<LruCache<usize, Arc<[u8]>>>,
}

impl std::fmt::Debug for SevenZArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SevenZArchive")
            .field("entries", &self.tree.len())
            .field("folders", &self.streams.folders.len())
            .finish_non_exhaustive()
    }
}

impl SevenZArchive {
    fn index(
        source: Box<dyn Source>,
        source_len: u64,
        header: header::Header,
        cache_folders: NonZeroUsize,
    ) -> Result<Self> {
        let streams = header.streams;

        // Substream k belongs to the folder whose running count covers k.
        let mut locations = Vec::new();
        for (folder, &count) in streams.substream_counts.iter().enumerate() {
            let mut offset = 0u64;
            for _ in 0..count {
                let k = locations.len();
                let size = *streams
                    .substream_sizes
                    .get(k)
                    .ok_or_else(|| Error::corrupt(FORMAT, "substream size missing"))?;
                locations.push(EntryLocation {
                    folder: Some(folder),
                    offset,
                    size,
                    crc: streams.substream_crcs.get(k).copied().flatten(),
                });
                offset += size;
            }
        }

        let mut tree = DirTree::new(false);
        let mut next_stream = locations.into_iter();
        for file in header.files {
            if file.is_anti {
                log::trace!("7z: ignoring anti-item '{}'", file.name);
                continue;
            }
            let meta = if file.is_dir {
                Metadata::directory()
            } else {
                Metadata::file(0)
            }
            .with_modified(file.modified)
            .with_created(file.created)
            .with_accessed(file.accessed);

            if file.is_dir {
                if let Err(e) = tree.insert_dir(&file.name, meta) {
                    log::warn!("7z: skipping directory '{}': {}", file.name, e);
                }
                continue;
            }
            let location = if file.has_stream {
                next_stream
                    .next()
                    .ok_or_else(|| Error::corrupt(FORMAT, "more files than streams"))?
            } else {
                EntryLocation {
                    folder: None,
                    offset: 0,
                    size: 0,
                    crc: None,
                }
            };
            let meta = Metadata {
                size: location.size,
                ..meta
            }
            .with_read_only(true);
            log::trace!("7z: indexed '{}' ({} bytes)", file.name, location.size);
            if let Err(e) = tree.insert_file(&file.name, meta, location) {
                log::warn!("7z: skipping entry '{}': {}", file.name, e);
            }
        }

        Ok(Self {
            source: Mutex::new(source),
            source_len,
            streams,
            tree,
            cache: Mutex::new(LruCache::new(cache_folders)),
        })
    }

    /// Returns the decoded bytes of folder `index`, decoding on a cache miss.
    fn folder_data(&self, index: usize) -> Result<Arc<[u8]>> {
        if let Some(data) = lock_or_recover(&self.cache).get(&index) {
            return Ok(Arc::clone(data));
        }
        // Decode without holding the cache lock; a racing thread may decode
        // the same folder, and the later insert simply replaces the earlier.
        let template = lock_or_recover(&self.source).try_clone()?;
        log::debug!("7z: decoding folder {}", index);
        let data: Arc<[u8]> =
            decode_folder(template.as_ref(), self.source_len, &self.streams, index, u64::MAX)?.into();
        lock_or_recover(&self.cache).put(index, Arc::clone(&data));
        Ok(data)
    }
}

impl Archive for SevenZArchive {
    fn format(&self) -> &'static str {
        INFO.name
    }

    fn stat(&self, path: &VirtualPath) -> Result<Metadata> {
        self.tree.stat(path)
    }

    fn enumerate(
        &self,
        dir: &VirtualPath,
        callback: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>> {
        self.tree.enumerate(dir, callback)
    }

    fn open_read(&self, path: &VirtualPath) -> Result<Box<dyn ReadStream>> {
        let (node, location) = self.tree.file(path)?;
        let Some(folder) = location.folder else {
            return Ok(Box::new(MemorySource::new(Vec::new())));
        };
        let data = self.folder_data(folder)?;
        let end = location.offset + location.size;
        if end > data.len() as u64 {
            return Err(Error::corrupt(
                FORMAT,
                format!("entry '{}' extends past its folder", node.path),
            ));
        }
        let (start, size) = (location.offset as usize, location.size as usize);
        if let Some(expected) = location.crc {
            let actual = crc32fast::hash(&data[start..start + size]);
            if actual != expected {
                return Err(Error::CrcMismatch {
                    path: node.path.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(Box::new(MemorySource::window(data, start, size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn write_number(out: &mut Vec<u8>, value: u64) {
        let mut extra = 0;
        while extra < 8 && value >= 1u64 << (7 * (extra + 1)) {
            extra += 1;
        }
        let high = (value >> (8 * extra)) as u8;
        out.push(!(0xFFu8 >> extra) | high);
        out.extend_from_slice(&value.to_le_bytes()[..extra]);
    }

    fn utf16_names(names: &[&str]) -> Vec<u8> {
        let mut out = vec![0];
        for name in names {
            for unit in name.encode_utf16().chain([0]) {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        out
    }

    /// Builds a solid, copy-method archive holding `files` plus one empty
    /// directory named `dir`.
    fn build(files: &[(&str, &[u8])]) -> Vec<u8> {
        let packed: Vec<u8> = files.iter().flat_map(|(_, d)| d.iter().copied()).collect();
        let mut h = vec![property_id::HEADER, property_id::MAIN_STREAMS_INFO];
        h.push(property_id::PACK_INFO);
        write_number(&mut h, 0);
        write_number(&mut h, 1);
        h.push(property_id::SIZE);
        write_number(&mut h, packed.len() as u64);
        h.push(property_id::END);

        h.extend_from_slice(&[property_id::UNPACK_INFO, property_id::FOLDER, 1, 0]);
        h.extend_from_slice(&[1, 0x01, 0x00]);
        h.push(property_id::CODERS_UNPACK_SIZE);
        write_number(&mut h, packed.len() as u64);
        h.push(property_id::END);

        h.push(property_id::SUBSTREAMS_INFO);
        h.push(property_id::NUM_UNPACK_STREAM);
        write_number(&mut h, files.len() as u64);
        h.push(property_id::SIZE);
        for (_, data) in &files[..files.len() - 1] {
            write_number(&mut h, data.len() as u64);
        }
        h.extend_from_slice(&[property_id::CRC, 1]);
        for (_, data) in files {
            h.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        }
        h.push(property_id::END);
        h.push(property_id::END);

        let count = files.len() + 1;
        h.push(property_id::FILES_INFO);
        write_number(&mut h, count as u64);
        let mut empty = vec![0u8; count.div_ceil(8)];
        empty[files.len() / 8] |= 0x80 >> (files.len() % 8);
        h.push(property_id::EMPTY_STREAM);
        write_number(&mut h, empty.len() as u64);
        h.extend_from_slice(&empty);
        let mut names: Vec<&str> = files.iter().map(|(n, _)| *n).collect();
        names.push("dir");
        let names = utf16_names(&names);
        h.push(property_id::NAME);
        write_number(&mut h, names.len() as u64);
        h.extend_from_slice(&names);
        h.push(property_id::MTIME);
        write_number(&mut h, 2 + 8 * count as u64);
        h.extend_from_slice(&[1, 0]);
        for _ in 0..count {
            h.extend_from_slice(&132_000_000_000_000_000u64.to_le_bytes());
        }
        h.push(property_id::END);
        h.push(property_id::END);

        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&[0, 4]);
        let mut tail = Vec::new();
        tail.extend_from_slice(&(packed.len() as u64).to_le_bytes());
        tail.extend_from_slice(&(h.len() as u64).to_le_bytes());
        tail.extend_from_slice(&crc32fast::hash(&h).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&tail).to_le_bytes());
        out.extend_from_slice(&tail);
        out.extend_from_slice(&packed);
        out.extend_from_slice(&h);
        out
    }

    fn open(bytes: Vec<u8>) -> Arc<dyn Archive> {
        match SevenZFormat::default()
            .open(&MemorySource::new(bytes), "test.7z")
            .unwrap()
        {
            Detection::Claimed(archive) => archive,
            Detection::NotThisFormat => panic!("not claimed"),
        }
    }

    fn read(archive: &Arc<dyn Archive>, path: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        archive
            .open_read(&VirtualPath::new(path)?)?
            .read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_solid_copy_archive() {
        let archive = open(build(&[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]));
        assert_eq!(read(&archive, "a.txt").unwrap(), b"alpha");
        assert_eq!(read(&archive, "sub/b.txt").unwrap(), b"beta");
        assert!(archive.stat(&VirtualPath::new("dir").unwrap()).unwrap().is_dir());
        let meta = archive.stat(&VirtualPath::new("a.txt").unwrap()).unwrap();
        assert_eq!(meta.size, 5);
        assert!(meta.modified.is_some());
    }

    #[test]
    fn test_random_access_within_entry() {
        let archive = open(build(&[("x", b"0123456789")]));
        let mut stream = archive.open_read(&VirtualPath::new("x").unwrap()).unwrap();
        stream.seek(SeekFrom::Start(7)).unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"789");
    }

    #[test]
    fn test_corrupt_entry_fails_alone() {
        let mut bytes = build(&[("good", b"good"), ("bad", b"bad!")]);
        // flip a byte of "bad!" in the packed data
        bytes[32 + 5] ^= 0x20;
        let archive = open(bytes);
        assert_eq!(read(&archive, "good").unwrap(), b"good");
        assert!(matches!(
            read(&archive, "bad").unwrap_err(),
            Error::CrcMismatch { .. }
        ));
    }

    #[test]
    fn test_bad_start_header_crc() {
        let mut bytes = build(&[("a", b"a")]);
        bytes[8] ^= 1;
        let err = SevenZFormat::default()
            .open(&MemorySource::new(bytes), "bad.7z")
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_archive() {
        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&[0, 4]);
        let tail = [0u8; 20];
        out.extend_from_slice(&crc32fast::hash(&tail).to_le_bytes());
        out.extend_from_slice(&tail);
        let archive = open(out);
        let mut names = Vec::new();
        archive
            .enumerate(&VirtualPath::root(), &mut |n| {
                names.push(n.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_cache_capacity_at_least_one() {
        assert_eq!(SevenZFormat::with_cache_folders(0).cache_folders.get(), 1);
    }
}
