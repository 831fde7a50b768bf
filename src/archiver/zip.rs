//! ZIP archives (including zip64, `.pk3` and `.pk4`).
//!
//! The central directory is located through the end-of-central-directory
//! record (searched in the final 64 KiB + 22 bytes), optionally redirected by
//! a zip64 locator. Local headers are only read the first time an entry is
//! opened. Data prepended to the archive (self-extracting stubs) is handled by
//! measuring where the central directory actually ends up.
//!
//! Entries support stored, deflate, bzip2 and LZMA compression. The CRC-32 of
//! an entry is checked once it has been read to its end. Unix symlinks are
//! indexed as [`FileType::Symlink`](crate::FileType::Symlink) and resolved
//! inside the archive when opened.

use super::{Archive, ArchiveFormat, FormatInfo, Detection};
use crate::codec::{self, Method, zip_method};
use crate::dirtree::DirTree;
use crate::metadata::Metadata;
use crate::path::VirtualPath;
use crate::source::{ReadStream, SliceStream, Source, le_u16, le_u32, le_u64, read_exact_at, read_vec_at, resolve_seek};
use crate::sync::lock_or_recover;
use crate::timestamp::Timestamp;
use crate::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, OnceLock};

const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD_SIZE: u64 = 22;
const MAX_COMMENT: u64 = 0xFFFF;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_SIZE: u64 = 20;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const CENTRAL_HEADER_SIZE: usize = 46;
const LOCAL_SIG: u32 = 0x0403_4b50;
const LOCAL_HEADER_SIZE: usize = 30;

const EXTRA_ZIP64: u16 = 0x0001;
const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_UTF8: u16 = 0x0800;

const HOST_UNIX: u8 = 3;
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const S_IFDIR: u32 = 0o040000;

const MAX_SYMLINK_HOPS: usize = 16;
const MAX_SYMLINK_TARGET: u64 = 4096;

/// Skip buffer used when seeking forward in compressed entries.
const SKIP_CHUNK: usize = 16 * 1024;

static INFO: FormatInfo = FormatInfo {
    name: "ZIP",
    extensions: &["zip", "pk3", "pk4"],
    description: "PkZip/WinZip/Info-Zip compatible",
    supports_symlinks: true,
};

/// The ZIP format plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipFormat;

impl ArchiveFormat for ZipFormat {
    fn info(&self) -> &FormatInfo {
        &INFO
    }

    fn open(&self, source: &dyn Source, name: &str) -> Result<Detection> {
        let mut src = source.try_clone()?;
        let len = src.len()?;
        if len < EOCD_SIZE {
            return Ok(Detection::NotThisFormat);
        }
        let Some(eocd_pos) = find_eocd(src.as_mut(), len)? else {
            return Ok(Detection::NotThisFormat);
        };
        let directory = read_directory_location(src.as_mut(), len, eocd_pos)?;
        log::debug!(
            "{}: ZIP with {} entries (central directory at {}, base {})",
            name,
            directory.entries,
            directory.offset,
            directory.base
        );

        let archive = ZipArchive::index(src, len, &directory)?;
        Ok(Detection::Claimed(Arc::new(archive)))
    }
}

/// Scans backwards for the end-of-central-directory signature.
fn find_eocd(src: &mut dyn Source, len: u64) -> Result<Option<u64>> {
    let window = len.min(EOCD_SIZE + MAX_COMMENT);
    let start = len - window;
    let buf = read_vec_at(src, start, window as usize)?;
    let sig = EOCD_SIG.to_le_bytes();
    for i in (0..=buf.len() - EOCD_SIZE as usize).rev() {
        if buf[i..i + 4] == sig {
            return Ok(Some(start + i as u64));
        }
    }
    Ok(None)
}

/// Where the central directory lives and how many records it holds.
#[derive(Debug)]
struct DirectoryLocation {
    entries: u64,
    size: u64,
    offset: u64,
    /// Bytes prepended before the archive proper.
    base: u64,
}

fn read_directory_location(src: &mut dyn Source, len: u64, eocd_pos: u64) -> Result<DirectoryLocation> {
    let mut eocd = [0u8; EOCD_SIZE as usize];
    read_exact_at(src, eocd_pos, &mut eocd)?;
    let disk = le_u16(&eocd, 4);
    let cd_disk = le_u16(&eocd, 6);
    let mut entries = u64::from(le_u16(&eocd, 10));
    let mut size = u64::from(le_u32(&eocd, 12));
    let mut offset = u64::from(le_u32(&eocd, 16));
    let mut record_end = eocd_pos;

    if eocd_pos >= ZIP64_LOCATOR_SIZE {
        let mut locator = [0u8; ZIP64_LOCATOR_SIZE as usize];
        read_exact_at(src, eocd_pos - ZIP64_LOCATOR_SIZE, &mut locator)?;
        if le_u32(&locator, 0) == ZIP64_LOCATOR_SIG {
            let zip64_pos = le_u64(&locator, 8);
            let mut record = [0u8; 56];
            if zip64_pos.checked_add(56).is_none_or(|end| end > len) {
                return Err(Error::corrupt("ZIP", "zip64 end record past end of file"));
            }
            read_exact_at(src, zip64_pos, &mut record)?;
            if le_u32(&record, 0) != ZIP64_EOCD_SIG {
                return Err(Error::corrupt("ZIP", "bad zip64 end record signature"));
            }
            entries = le_u64(&record, 32);
            size = le_u64(&record, 40);
            offset = le_u64(&record, 48);
            record_end = zip64_pos;
        }
    }

    if disk != 0 || cd_disk != 0 {
        return Err(Error::corrupt("ZIP", "multi-volume archives are not supported"));
    }
    // The directory should end where the end records begin; anything more is
    // data prepended to the archive.
    let expected_end = offset
        .checked_add(size)
        .ok_or_else(|| Error::corrupt("ZIP", "central directory size overflow"))?;
    if expected_end > record_end {
        return Err(Error::corrupt("ZIP", "central directory past end records"));
    }
    let base = record_end - expected_end;
    if entries > size / CENTRAL_HEADER_SIZE as u64 {
        return Err(Error::corrupt("ZIP", "entry count exceeds central directory size"));
    }
    Ok(DirectoryLocation {
        entries,
        size,
        offset,
        base,
    })
}

/// One indexed zip entry.
#[derive(Debug)]
struct ZipEntry {
    local_header: u64,
    compressed_size: u64,
    uncompressed_size: u64,
    method: u16,
    general_flags: u16,
    crc32: u32,
    /// Resolved from the local header on first open.
    data_offset: OnceLock<u64>,
}

/// An opened ZIP archive.
pub struct ZipArchive {
    source: Mutex<Box<dyn Source>>,
    source_len: u64,
    tree: DirTree<ZipEntry>,
}

impl std::fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("entries", &self.tree.len())
            .finish_non_exhaustive()
    }
}

impl ZipArchive {
    fn index(mut src: Box<dyn Source>, len: u64, location: &DirectoryLocation) -> Result<Self> {
        let start = location.base + location.offset;
        if start + location.size > len {
            return Err(Error::corrupt("ZIP", "central directory past end of file"));
        }
        let directory = read_vec_at(src.as_mut(), start, location.size as usize)?;

        let mut tree = DirTree::new(false);
        let mut pos = 0usize;
        for _ in 0..location.entries {
            if pos + CENTRAL_HEADER_SIZE > directory.len() {
                return Err(Error::corrupt("ZIP", "truncated central directory"));
            }
            let header = &directory[pos..];
            if le_u32(header, 0) != CENTRAL_SIG {
                return Err(Error::corrupt("ZIP", "bad central directory signature"));
            }
            let name_len = usize::from(le_u16(header, 28));
            let extra_len = usize::from(le_u16(header, 30));
            let comment_len = usize::from(le_u16(header, 32));
            let record_len = CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len;
            if pos + record_len > directory.len() {
                return Err(Error::corrupt("ZIP", "truncated central directory record"));
            }
            let record = &directory[pos..pos + record_len];
            pos += record_len;

            let (name, meta, entry) = parse_central_record(record, name_len, extra_len, location.base)?;
            let result = if meta.is_dir() {
                tree.insert_dir(&name, meta)
            } else {
                tree.insert_file(&name, meta, entry)
            };
            if let Err(e) = result {
                log::warn!("ZIP: skipping entry '{}': {}", name, e);
            }
        }

        Ok(Self {
            source: Mutex::new(src),
            source_len: len,
            tree,
        })
    }

    /// Follows symbolic links starting at `path` until a non-link entry.
    fn resolve(&self, path: &VirtualPath) -> Result<VirtualPath> {
        let mut current = path.clone();
        for _ in 0..MAX_SYMLINK_HOPS {
            let (node, entry) = self.tree.file(&current)?;
            if !node.meta.is_symlink() {
                return Ok(current);
            }
            if entry.uncompressed_size > MAX_SYMLINK_TARGET {
                return Err(Error::corrupt("ZIP", "symlink target too long"));
            }
            let mut target = Vec::new();
            self.open_entry(&current, entry)?.read_to_end(&mut target)?;
            let target = String::from_utf8_lossy(&target).into_owned();
            let base = if target.starts_with('/') {
                VirtualPath::root()
            } else {
                current.parent().unwrap_or_default()
            };
            log::trace!("ZIP: symlink {} -> {}", current, target);
            current = base.join(&target)?;
        }
        Err(Error::corrupt(
            "ZIP",
            format!("too many levels of symbolic links at '{}'", path.as_str()),
        ))
    }

    fn data_offset(&self, entry: &ZipEntry) -> Result<u64> {
        if let Some(offset) = entry.data_offset.get() {
            return Ok(*offset);
        }
        let mut header = [0u8; LOCAL_HEADER_SIZE];
        let header_end = entry
            .local_header
            .checked_add(LOCAL_HEADER_SIZE as u64)
            .filter(|end| *end <= self.source_len)
            .ok_or_else(|| Error::corrupt("ZIP", "local header past end of file"))?;
        {
            let mut source = lock_or_recover(&self.source);
            read_exact_at(source.as_mut(), entry.local_header, &mut header)?;
        }
        if le_u32(&header, 0) != LOCAL_SIG {
            return Err(Error::corrupt("ZIP", "bad local header signature"));
        }
        let name_len = u64::from(le_u16(&header, 26));
        let extra_len = u64::from(le_u16(&header, 28));
        let offset = header_end + name_len + extra_len;
        Ok(*entry.data_offset.get_or_init(|| offset))
    }

    fn open_entry(&self, path: &VirtualPath, entry: &ZipEntry) -> Result<Box<dyn ReadStream>> {
        if entry.general_flags & FLAG_ENCRYPTED != 0 {
            log::warn!("ZIP: '{}' is encrypted", path);
            return Err(Error::UnsupportedMethod {
                format: "ZIP",
                method: u64::from(entry.method),
            });
        }
        let data_offset = self.data_offset(entry)?;
        if data_offset
            .checked_add(entry.compressed_size)
            .is_none_or(|end| end > self.source_len)
        {
            return Err(Error::corrupt(
                "ZIP",
                format!("entry '{}' data past end of file", path.as_str()),
            ));
        }
        let source = lock_or_recover(&self.source).try_clone()?;
        let stream = ZipEntryStream::new(
            source,
            path.as_str().to_string(),
            data_offset,
            entry.compressed_size,
            entry.uncompressed_size,
            entry.method,
            entry.crc32,
        )?;
        Ok(Box::new(stream))
    }
}

impl Archive for ZipArchive {
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
        let resolved = self.resolve(path)?;
        let (_, entry) = self.tree.file(&resolved)?;
        self.open_entry(&resolved, entry)
    }
}

/// Parses one central directory record into a name, metadata and location.
fn parse_central_record(
    record: &[u8],
    name_len: usize,
    extra_len: usize,
    base: u64,
) -> Result<(String, Metadata, ZipEntry)> {
    let version_made_by = le_u16(record, 4);
    let general_flags = le_u16(record, 8);
    let method = le_u16(record, 10);
    let dos_time = le_u16(record, 12);
    let dos_date = le_u16(record, 14);
    let crc32 = le_u32(record, 16);
    let mut compressed_size = u64::from(le_u32(record, 20));
    let mut uncompressed_size = u64::from(le_u32(record, 24));
    let external_attrs = le_u32(record, 38);
    let mut local_header = u64::from(le_u32(record, 42));

    let raw_name = &record[CENTRAL_HEADER_SIZE..CENTRAL_HEADER_SIZE + name_len];
    let name = if general_flags & FLAG_UTF8 != 0 {
        String::from_utf8_lossy(raw_name).into_owned()
    } else {
        decode_cp437(raw_name)
    };

    let mut modified = Timestamp::from_dos_datetime(dos_date, dos_time);
    let extra = &record[CENTRAL_HEADER_SIZE + name_len..CENTRAL_HEADER_SIZE + name_len + extra_len];
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = le_u16(extra, pos);
        let size = usize::from(le_u16(extra, pos + 2));
        let end = (pos + 4 + size).min(extra.len());
        let field = &extra[pos + 4..end];
        match id {
            EXTRA_ZIP64 => {
                let mut values = field.chunks_exact(8).map(|c| le_u64(c, 0));
                if uncompressed_size == 0xFFFF_FFFF {
                    uncompressed_size = values
                        .next()
                        .ok_or_else(|| Error::corrupt("ZIP", "zip64 field missing size"))?;
                }
                if compressed_size == 0xFFFF_FFFF {
                    compressed_size = values
                        .next()
                        .ok_or_else(|| Error::corrupt("ZIP", "zip64 field missing size"))?;
                }
                if local_header == 0xFFFF_FFFF {
                    local_header = values
                        .next()
                        .ok_or_else(|| Error::corrupt("ZIP", "zip64 field missing offset"))?;
                }
            }
            EXTRA_EXTENDED_TIMESTAMP if field.len() >= 5 && field[0] & 1 != 0 => {
                modified = Timestamp::from_unix_secs(i64::from(le_u32(field, 1) as i32)).or(modified);
            }
            _ => {}
        }
        pos += 4 + size;
    }

    let host = (version_made_by >> 8) as u8;
    let unix_mode = if host == HOST_UNIX {
        Some(external_attrs >> 16)
    } else {
        None
    };
    let is_dir = name.ends_with('/')
        || name.ends_with('\\')
        || unix_mode.is_some_and(|m| m & S_IFMT == S_IFDIR)
        || (unix_mode.is_none() && external_attrs & 0x10 != 0);
    let is_symlink = unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK);

    let meta = if is_dir {
        Metadata::directory()
    } else if is_symlink {
        Metadata::symlink(uncompressed_size)
    } else {
        Metadata::file(uncompressed_size)
    }
    .with_modified(modified);

    let entry = ZipEntry {
        local_header: base
            .checked_add(local_header)
            .ok_or_else(|| Error::corrupt("ZIP", "local header offset overflow"))?,
        compressed_size,
        uncompressed_size,
        method,
        general_flags,
        crc32,
        data_offset: OnceLock::new(),
    };
    Ok((name, meta, entry))
}

/// Code page 437, bytes 0x80 to 0xFF.
const CP437_HIGH: &str = concat!(
    "ÇüéâäàåçêëèïîìÄÅ",
    "ÉæÆôöòûùÿÖÜ¢£¥₧ƒ",
    "áíóúñÑªº¿⌐¬½¼¡«»",
    "░▒▓│┤╡╢╖╕╣║╗╝╜╛┐",
    "└┴┬├─┼╞╟╚╔╩╦╠═╬╧",
    "╨╤╥╙╘╒╓╫╪┘┌█▄▌▐▀",
    "αßΓπΣσµτΦΘΩδ∞φε∩",
    "≡±≥≤⌠⌡÷≈°∙·√ⁿ²■\u{a0}",
);

/// Decodes a name stored without the UTF-8 flag.
fn decode_cp437(raw: &[u8]) -> String {
    if raw.is_ascii() {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let high: Vec<char> = CP437_HIGH.chars().collect();
    raw.iter()
        .map(|&b| {
            if b < 0x80 {
                char::from(b)
            } else {
                high[usize::from(b - 0x80)]
            }
        })
        .collect()
}

// ============================================================================
// Entry stream
// ============================================================================

/// A seekable, CRC-checking reader over one zip entry.
///
/// Compressed data can only be read forwards, so a backwards seek restarts
/// the decoder and skips ahead. The CRC is accumulated over every byte that
/// passes through in order from offset 0.
struct ZipEntryStream {
    source: Box<dyn Source>,
    path: String,
    data_offset: u64,
    compressed_size: u64,
    len: u64,
    method: u16,
    expected_crc: u32,
    decoder: Box<dyn Read + Send>,
    /// Position of `decoder` in uncompressed bytes.
    decoded: u64,
    /// Logical cursor.
    pos: u64,
    hasher: crc32fast::Hasher,
    hashed: u64,
    verified: bool,
}

impl ZipEntryStream {
    fn new(
        source: Box<dyn Source>,
        path: String,
        data_offset: u64,
        compressed_size: u64,
        len: u64,
        method: u16,
        expected_crc: u32,
    ) -> Result<Self> {
        let decoder = build_entry_decoder(
            source.try_clone()?,
            data_offset,
            compressed_size,
            len,
            method,
        )?;
        Ok(Self {
            source,
            path,
            data_offset,
            compressed_size,
            len,
            method,
            expected_crc,
            decoder,
            decoded: 0,
            pos: 0,
            hasher: crc32fast::Hasher::new(),
            hashed: 0,
            verified: false,
        })
    }

    fn is_stored(&self) -> bool {
        self.method == zip_method::STORED
    }

    fn restart(&mut self) -> io::Result<()> {
        self.decoder = build_entry_decoder(
            self.source.try_clone()?,
            self.data_offset,
            self.compressed_size,
            self.len,
            self.method,
        )
        .map_err(io::Error::from)?;
        self.decoded = 0;
        Ok(())
    }

    /// Moves the decoder to `self.pos`.
    fn sync_decoder(&mut self) -> io::Result<()> {
        if self.decoded == self.pos {
            return Ok(());
        }
        if self.is_stored() {
            // stored entries read straight from the source
            self.decoder = Box::new(self.stored_reader_at(self.pos)?);
            self.decoded = self.pos;
            return Ok(());
        }
        if self.pos < self.decoded {
            self.restart()?;
        }
        let mut scratch = vec![0u8; SKIP_CHUNK];
        while self.decoded < self.pos {
            let want = usize::try_from(self.pos - self.decoded)
                .unwrap_or(usize::MAX)
                .min(SKIP_CHUNK);
            let n = self.decoder.read(&mut scratch[..want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "compressed data ended early",
                ));
            }
            self.track_crc(self.decoded, &scratch[..n])?;
            self.decoded += n as u64;
        }
        Ok(())
    }

    fn stored_reader_at(&self, pos: u64) -> io::Result<SliceStream> {
        let mut slice = SliceStream::new(self.source.try_clone()?, self.data_offset, self.len);
        slice.seek(SeekFrom::Start(pos))?;
        Ok(slice)
    }

    /// Feeds `data` found at `at` into the checksum if it extends the hashed
    /// prefix, and verifies once the whole entry has been seen.
    fn track_crc(&mut self, at: u64, data: &[u8]) -> io::Result<()> {
        if at != self.hashed || self.verified {
            return Ok(());
        }
        self.hasher.update(data);
        self.hashed += data.len() as u64;
        if self.hashed == self.len {
            self.verified = true;
            let actual = self.hasher.clone().finalize();
            if actual != self.expected_crc {
                log::warn!("ZIP: CRC mismatch for '{}'", self.path);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    Error::CrcMismatch {
                        path: self.path.clone(),
                        expected: self.expected_crc,
                        actual,
                    },
                ));
            }
        }
        Ok(())
    }
}

fn build_entry_decoder(
    mut source: Box<dyn Source>,
    data_offset: u64,
    compressed_size: u64,
    len: u64,
    method: u16,
) -> Result<Box<dyn Read + Send>> {
    let method = match method {
        zip_method::STORED => {
            return Ok(Box::new(SliceStream::new(source, data_offset, len)));
        }
        zip_method::DEFLATE => Method::Deflate,
        zip_method::BZIP2 => Method::Bzip2,
        zip_method::LZMA => {
            // version (2), properties size (2), then the properties
            let mut header = [0u8; 9];
            read_exact_at(source.as_mut(), data_offset, &mut header)?;
            if le_u16(&header, 2) != 5 {
                return Err(Error::corrupt("ZIP", "unexpected LZMA properties size"));
            }
            let packed = SliceStream::new(source, data_offset + 9, compressed_size.saturating_sub(9));
            let method = Method::Lzma {
                props: header[4],
                dict_size: le_u32(&header, 5),
            };
            let decoder = codec::build_decoder(packed, &method, len, "ZIP")?;
            return Ok(Box::new(decoder));
        }
        other => {
            return Err(Error::UnsupportedMethod {
                format: "ZIP",
                method: u64::from(other),
            });
        }
    };
    let packed = SliceStream::new(source, data_offset, compressed_size);
    let decoder = codec::build_decoder(packed, &method, len, "ZIP")?;
    Ok(Box::new(decoder))
}

impl Read for ZipEntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        self.sync_decoder()?;
        let want = usize::try_from(self.len - self.pos)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let n = self.decoder.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry '{}' ended before its recorded size", self.path),
            ));
        }
        let at = self.pos;
        self.pos += n as u64;
        self.decoded = self.pos;
        self.track_crc(at, &buf[..n])?;
        Ok(n)
    }
}

impl Seek for ZipEntryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }
}

impl ReadStream for ZipEntryStream {
    fn len(&self) -> u64 {
        self.len
    }
}
