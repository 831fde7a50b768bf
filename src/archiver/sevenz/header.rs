//! 7z header structures and parsing.
//!
//! The next header is a tree of property-tagged sections. Everything here
//! works on an in-memory buffer: headers are read (and, when encoded,
//! decompressed) in full before parsing, so every count can be checked
//! against the bytes that remain.

use crate::codec::Method;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

/// 7z property ids.
pub(super) mod property_id {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const ARCHIVE_PROPERTIES: u8 = 0x02;
    pub const ADDITIONAL_STREAMS_INFO: u8 = 0x03;
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0A;
    pub const FOLDER: u8 = 0x0B;
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    pub const EMPTY_STREAM: u8 = 0x0E;
    pub const EMPTY_FILE: u8 = 0x0F;
    pub const ANTI: u8 = 0x10;
    pub const NAME: u8 = 0x11;
    pub const CTIME: u8 = 0x12;
    pub const ATIME: u8 = 0x13;
    pub const MTIME: u8 = 0x14;
    pub const WIN_ATTRIBUTES: u8 = 0x15;
    pub const ENCODED_HEADER: u8 = 0x17;
}

use property_id as id;

const FORMAT: &str = "7z";
const MAX_CODERS: u64 = 32;

const ATTRIBUTE_READ_ONLY: u32 = 0x01;
const ATTRIBUTE_DIRECTORY: u32 = 0x10;

fn truncated() -> Error {
    Error::corrupt(FORMAT, "truncated header")
}

/// A bounds-checked cursor over header bytes.
pub(super) struct HeaderReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(truncated());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads a 7z variable-length number.
    ///
    /// The count of leading one bits in the first byte gives the number of
    /// extra little-endian bytes; the remaining bits of the first byte are the
    /// most significant part of the value.
    pub fn number(&mut self) -> Result<u64> {
        let first = self.u8()?;
        let mut mask = 0x80u8;
        let mut value = 0u64;
        for i in 0..8 {
            if first & mask == 0 {
                let high = u64::from(first & mask.wrapping_sub(1));
                return Ok(value | (high << (8 * i)));
            }
            value |= u64::from(self.u8()?) << (8 * i);
            mask >>= 1;
        }
        Ok(value)
    }

    /// Reads a count, rejecting values that could not fit in what remains.
    fn count(&mut self) -> Result<usize> {
        let n = self.number()?;
        if n > (self.remaining() as u64).saturating_mul(8) {
            return Err(Error::corrupt(FORMAT, format!("implausible count {}", n)));
        }
        Ok(n as usize)
    }

    /// Reads an MSB-first bit vector.
    fn bits(&mut self, n: usize) -> Result<Vec<bool>> {
        let bytes = self.bytes(n.div_ceil(8))?;
        Ok((0..n).map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0).collect())
    }

    /// Reads an "all defined" byte, then a bit vector if it is zero.
    fn defined(&mut self, n: usize) -> Result<Vec<bool>> {
        if self.u8()? != 0 {
            Ok(vec![true; n])
        } else {
            self.bits(n)
        }
    }

    /// Splits off the next `n` bytes as their own reader.
    fn sub(&mut self, n: u64) -> Result<HeaderReader<'a>> {
        let n = usize::try_from(n).map_err(|_| truncated())?;
        Ok(HeaderReader::new(self.bytes(n)?))
    }

    fn expect(&mut self, property: u8) -> Result<()> {
        let found = self.u8()?;
        if found != property {
            return Err(Error::corrupt(
                FORMAT,
                format!("expected property {:#04x}, found {:#04x}", property, found),
            ));
        }
        Ok(())
    }

    fn external(&mut self) -> Result<()> {
        if self.u8()? != 0 {
            return Err(Error::corrupt(FORMAT, "external header data is not supported"));
        }
        Ok(())
    }
}

/// One coder of a folder.
#[derive(Debug, Clone)]
pub(super) struct Coder {
    pub method_id: Vec<u8>,
    pub num_in_streams: u64,
    pub num_out_streams: u64,
    pub properties: Vec<u8>,
}

/// Connects a coder input stream to another coder's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct BindPair {
    pub in_index: u64,
    pub out_index: u64,
}

/// A block of packed data decoded by a chain of coders.
#[derive(Debug, Clone, Default)]
pub(super) struct Folder {
    pub coders: Vec<Coder>,
    pub bind_pairs: Vec<BindPair>,
    pub packed_streams: Vec<u64>,
    /// One size per coder output stream.
    pub unpack_sizes: Vec<u64>,
    pub unpack_crc: Option<u32>,
}

impl Folder {
    fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Size of the folder's final output: the one out stream no bind pair
    /// consumes.
    pub fn unpack_size(&self) -> u64 {
        (0..self.unpack_sizes.len() as u64)
            .rev()
            .find(|&i| !self.bind_pairs.iter().any(|bp| bp.out_index == i))
            .and_then(|i| self.unpack_sizes.get(i as usize).copied())
            .unwrap_or(0)
    }

    /// Translates the coders into a decoder chain description.
    ///
    /// Supports a single coder, or a filter whose input is bound to the
    /// output of a codec reading the only packed stream.
    pub fn methods(&self) -> Result<(Vec<Method>, Vec<u64>)> {
        let simple = self
            .coders
            .iter()
            .all(|c| c.num_in_streams == 1 && c.num_out_streams == 1);
        let supported_shape = simple
            && match self.coders.len() {
                1 => self.bind_pairs.is_empty(),
                2 => {
                    self.bind_pairs == [BindPair { in_index: 0, out_index: 1 }]
                        && self.packed_streams == [1]
                }
                _ => false,
            };
        if !supported_shape {
            let first = self.coders.first().map(|c| c.method_id.as_slice()).unwrap_or(&[]);
            log::debug!(
                "7z: unsupported folder layout ({} coders, {} bind pairs)",
                self.coders.len(),
                self.bind_pairs.len()
            );
            return Err(Error::UnsupportedMethod {
                format: FORMAT,
                method: crate::codec::id_to_u64(first),
            });
        }
        let methods = self
            .coders
            .iter()
            .map(|c| Method::from_7z(&c.method_id, &c.properties))
            .collect::<Result<Vec<_>>>()?;
        Ok((methods, self.unpack_sizes.clone()))
    }
}

/// Pack, unpack and substream sections.
#[derive(Debug, Clone, Default)]
pub(super) struct StreamsInfo {
    pub pack_pos: u64,
    pub pack_sizes: Vec<u64>,
    pub folders: Vec<Folder>,
    /// Number of files stored in each folder.
    pub substream_counts: Vec<usize>,
    /// Size of each substream, all folders concatenated.
    pub substream_sizes: Vec<u64>,
    pub substream_crcs: Vec<Option<u32>>,
}

impl StreamsInfo {
    /// Returns `(offset, size)` of the packed stream feeding `folder`,
    /// relative to the end of the start header.
    pub fn pack_range(&self, folder: usize) -> Result<(u64, u64)> {
        let first: usize = self.folders[..folder]
            .iter()
            .map(|f| f.packed_streams.len())
            .sum();
        let size = *self
            .pack_sizes
            .get(first)
            .ok_or_else(|| Error::corrupt(FORMAT, "folder refers to a missing pack stream"))?;
        let offset = self.pack_sizes[..first]
            .iter()
            .try_fold(self.pack_pos, |acc, s| acc.checked_add(*s))
            .ok_or_else(|| Error::corrupt(FORMAT, "pack stream offset overflow"))?;
        Ok((offset, size))
    }
}

/// One entry of the files section.
#[derive(Debug, Clone, Default)]
pub(super) struct FileEntry {
    pub name: String,
    pub has_stream: bool,
    pub is_dir: bool,
    pub is_anti: bool,
    pub read_only: bool,
    pub created: Option<Timestamp>,
    pub accessed: Option<Timestamp>,
    pub modified: Option<Timestamp>,
}

/// A parsed plain header.
#[derive(Debug, Default)]
pub(super) struct Header {
    pub streams: StreamsInfo,
    pub files: Vec<FileEntry>,
}

/// Parses a plain header; `r` is positioned after the `HEADER` id.
pub(super) fn parse_header(r: &mut HeaderReader<'_>) -> Result<Header> {
    let mut header = Header::default();
    let mut property = r.u8()?;
    if property == id::ARCHIVE_PROPERTIES {
        loop {
            if r.u8()? == id::END {
                break;
            }
            let size = r.number()?;
            r.sub(size)?;
        }
        property = r.u8()?;
    }
    if property == id::ADDITIONAL_STREAMS_INFO {
        return Err(Error::corrupt(FORMAT, "additional streams are not supported"));
    }
    if property == id::MAIN_STREAMS_INFO {
        header.streams = parse_streams_info(r)?;
        property = r.u8()?;
    }
    if property == id::FILES_INFO {
        header.files = parse_files_info(r)?;
        property = r.u8()?;
    }
    if property != id::END {
        return Err(Error::corrupt(
            FORMAT,
            format!("unexpected property {:#04x} in header", property),
        ));
    }
    Ok(header)
}

/// Parses a streams section; `r` is positioned after its id.
pub(super) fn parse_streams_info(r: &mut HeaderReader<'_>) -> Result<StreamsInfo> {
    let mut info = StreamsInfo::default();
    let mut have_substreams = false;
    loop {
        match r.u8()? {
            id::END => break,
            id::PACK_INFO => parse_pack_info(r, &mut info)?,
            id::UNPACK_INFO => parse_unpack_info(r, &mut info)?,
            id::SUBSTREAMS_INFO => {
                parse_substreams_info(r, &mut info)?;
                have_substreams = true;
            }
            other => {
                return Err(Error::corrupt(
                    FORMAT,
                    format!("unexpected property {:#04x} in streams info", other),
                ));
            }
        }
    }
    if !have_substreams {
        info.substream_counts = vec![1; info.folders.len()];
        info.substream_sizes = info.folders.iter().map(Folder::unpack_size).collect();
        info.substream_crcs = info.folders.iter().map(|f| f.unpack_crc).collect();
    }
    Ok(info)
}

fn parse_pack_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> Result<()> {
    info.pack_pos = r.number()?;
    let count = r.count()?;
    info.pack_sizes = vec![0; count];
    loop {
        match r.u8()? {
            id::END => return Ok(()),
            id::SIZE => {
                for size in info.pack_sizes.iter_mut() {
                    *size = r.number()?;
                }
            }
            id::CRC => {
                // packed-stream digests are not needed to read entries
                let defined = r.defined(count)?;
                for _ in defined.iter().filter(|d| **d) {
                    r.u32()?;
                }
            }
            other => {
                return Err(Error::corrupt(
                    FORMAT,
                    format!("unexpected property {:#04x} in pack info", other),
                ));
            }
        }
    }
}

fn parse_unpack_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> Result<()> {
    r.expect(id::FOLDER)?;
    let count = r.count()?;
    r.external()?;
    let mut folders = Vec::new();
    for _ in 0..count {
        folders.push(parse_folder(r)?);
    }
    r.expect(id::CODERS_UNPACK_SIZE)?;
    for folder in folders.iter_mut() {
        for _ in 0..folder.total_out_streams() {
            folder.unpack_sizes.push(r.number()?);
        }
    }
    loop {
        match r.u8()? {
            id::END => break,
            id::CRC => {
                let defined = r.defined(folders.len())?;
                for (folder, has_crc) in folders.iter_mut().zip(defined) {
                    if has_crc {
                        folder.unpack_crc = Some(r.u32()?);
                    }
                }
            }
            other => {
                return Err(Error::corrupt(
                    FORMAT,
                    format!("unexpected property {:#04x} in unpack info", other),
                ));
            }
        }
    }
    info.folders = folders;
    Ok(())
}

fn parse_folder(r: &mut HeaderReader<'_>) -> Result<Folder> {
    let num_coders = r.number()?;
    if num_coders == 0 || num_coders > MAX_CODERS {
        return Err(Error::corrupt(
            FORMAT,
            format!("folder with {} coders", num_coders),
        ));
    }
    let mut folder = Folder::default();
    let mut total_in = 0u64;
    let mut total_out = 0u64;
    for _ in 0..num_coders {
        let flags = r.u8()?;
        if flags & 0x80 != 0 {
            return Err(Error::corrupt(FORMAT, "alternative coder methods are not supported"));
        }
        let method_id = r.bytes(usize::from(flags & 0x0F))?.to_vec();
        let (num_in_streams, num_out_streams) = if flags & 0x10 != 0 {
            (r.number()?, r.number()?)
        } else {
            (1, 1)
        };
        if num_in_streams > MAX_CODERS || num_out_streams > MAX_CODERS {
            return Err(Error::corrupt(FORMAT, "too many coder streams"));
        }
        let properties = if flags & 0x20 != 0 {
            let size = r.count()?;
            r.bytes(size)?.to_vec()
        } else {
            Vec::new()
        };
        total_in += num_in_streams;
        total_out += num_out_streams;
        folder.coders.push(Coder {
            method_id,
            num_in_streams,
            num_out_streams,
            properties,
        });
    }

    let num_bind_pairs = total_out.saturating_sub(1);
    for _ in 0..num_bind_pairs {
        let pair = BindPair {
            in_index: r.number()?,
            out_index: r.number()?,
        };
        if pair.in_index >= total_in || pair.out_index >= total_out {
            return Err(Error::corrupt(FORMAT, "bind pair out of range"));
        }
        folder.bind_pairs.push(pair);
    }

    let num_packed = total_in
        .checked_sub(num_bind_pairs)
        .ok_or_else(|| Error::corrupt(FORMAT, "more bind pairs than input streams"))?;
    if num_packed == 1 {
        let unbound = (0..total_in)
            .find(|i| !folder.bind_pairs.iter().any(|bp| bp.in_index == *i))
            .ok_or_else(|| Error::corrupt(FORMAT, "folder has no packed input"))?;
        folder.packed_streams.push(unbound);
    } else {
        for _ in 0..num_packed {
            folder.packed_streams.push(r.number()?);
        }
    }
    Ok(folder)
}

fn parse_substreams_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> Result<()> {
    let mut counts = vec![1usize; info.folders.len()];
    let mut property = r.u8()?;
    if property == id::NUM_UNPACK_STREAM {
        for count in counts.iter_mut() {
            *count = r.count()?;
        }
        property = r.u8()?;
    }

    let has_sizes = property == id::SIZE;
    let mut sizes = Vec::new();
    for (folder, &count) in info.folders.iter().zip(&counts) {
        if count == 0 {
            continue;
        }
        if count > 1 && !has_sizes {
            return Err(Error::corrupt(FORMAT, "substream sizes missing"));
        }
        let mut sum = 0u64;
        for _ in 1..count {
            let size = r.number()?;
            sum = sum
                .checked_add(size)
                .ok_or_else(|| Error::corrupt(FORMAT, "substream size overflow"))?;
            sizes.push(size);
        }
        let last = folder
            .unpack_size()
            .checked_sub(sum)
            .ok_or_else(|| Error::corrupt(FORMAT, "substreams larger than their folder"))?;
        sizes.push(last);
    }
    if has_sizes {
        property = r.u8()?;
    }

    // folders with a single substream and a folder CRC reuse that digest
    let mut crcs = Vec::new();
    let mut missing = 0usize;
    for (folder, &count) in info.folders.iter().zip(&counts) {
        if count == 1 && folder.unpack_crc.is_some() {
            crcs.push(folder.unpack_crc);
        } else {
            crcs.extend(std::iter::repeat_n(None, count));
            missing += count;
        }
    }

    while property != id::END {
        if property == id::CRC {
            let defined = r.defined(missing)?;
            let mut digests = defined.into_iter();
            let mut slot = 0usize;
            for (folder, &count) in info.folders.iter().zip(&counts) {
                if count == 1 && folder.unpack_crc.is_some() {
                    slot += 1;
                    continue;
                }
                for _ in 0..count {
                    if digests.next().unwrap_or(false) {
                        crcs[slot] = Some(r.u32()?);
                    }
                    slot += 1;
                }
            }
        } else {
            let size = r.number()?;
            r.sub(size)?;
        }
        property = r.u8()?;
    }

    info.substream_counts = counts;
    info.substream_sizes = sizes;
    info.substream_crcs = crcs;
    Ok(())
}

fn parse_files_info(r: &mut HeaderReader<'_>) -> Result<Vec<FileEntry>> {
    let count = r.count()?;
    let mut files = vec![FileEntry::default(); count];
    let mut empty_stream = vec![false; count];
    let mut empty_file: Vec<bool> = Vec::new();
    let mut anti: Vec<bool> = Vec::new();
    let mut names_seen = false;

    loop {
        let property = r.u8()?;
        if property == id::END {
            break;
        }
        let size = r.number()?;
        let mut section = r.sub(size)?;
        match property {
            id::EMPTY_STREAM => empty_stream = section.bits(count)?,
            id::EMPTY_FILE => {
                let empties = empty_stream.iter().filter(|e| **e).count();
                empty_file = section.bits(empties)?;
            }
            id::ANTI => {
                let empties = empty_stream.iter().filter(|e| **e).count();
                anti = section.bits(empties)?;
            }
            id::NAME => {
                section.external()?;
                for file in files.iter_mut() {
                    file.name = read_utf16_name(&mut section)?;
                }
                names_seen = true;
            }
            id::CTIME | id::ATIME | id::MTIME => {
                let defined = section.defined(count)?;
                section.external()?;
                for (file, has_time) in files.iter_mut().zip(defined) {
                    if !has_time {
                        continue;
                    }
                    let time = Some(Timestamp::from_filetime(section.u64()?));
                    match property {
                        id::CTIME => file.created = time,
                        id::ATIME => file.accessed = time,
                        _ => file.modified = time,
                    }
                }
            }
            id::WIN_ATTRIBUTES => {
                let defined = section.defined(count)?;
                section.external()?;
                for (file, has_attrs) in files.iter_mut().zip(defined) {
                    if has_attrs {
                        let attrs = section.u32()?;
                        file.is_dir |= attrs & ATTRIBUTE_DIRECTORY != 0;
                        file.read_only = attrs & ATTRIBUTE_READ_ONLY != 0;
                    }
                }
            }
            other => log::trace!("7z: skipping file property {:#04x}", other),
        }
    }
    if !names_seen && count > 0 {
        return Err(Error::corrupt(FORMAT, "file names missing"));
    }

    let mut empty_index = 0usize;
    for (file, &is_empty) in files.iter_mut().zip(&empty_stream) {
        file.has_stream = !is_empty;
        if is_empty {
            let is_empty_file = empty_file.get(empty_index).copied().unwrap_or(false);
            file.is_dir |= !is_empty_file;
            file.is_anti = anti.get(empty_index).copied().unwrap_or(false);
            empty_index += 1;
        } else {
            file.is_dir = false;
        }
    }
    Ok(files)
}

fn read_utf16_name(r: &mut HeaderReader<'_>) -> Result<String> {
    let mut units = Vec::new();
    loop {
        let b = r.bytes(2)?;
        let unit = u16::from_le_bytes([b[0], b[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    Ok(String::from_utf16_lossy(&units))
}
