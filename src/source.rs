//! Byte sources that archives are opened from.
//!
//! A [`Source`] is a seekable byte container that can be duplicated cheaply.
//! Archives keep one template source and hand a fresh duplicate to every open
//! file, so each handle owns its own cursor and reads never contend.
//!
//! Three implementations cover the mount kinds:
//!
//! - [`FileSource`]: a file on the host filesystem, reopened per duplicate
//! - [`MemorySource`]: a shared, immutable byte buffer
//! - [`StreamSource`](crate::archiver::StreamSource): a file opened inside
//!   another mounted archive

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A seekable, duplicable byte container.
pub trait Source: Read + Seek + Send {
    /// Returns the total length in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Returns true if the source is empty.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Creates an independent duplicate positioned at offset 0.
    fn try_clone(&self) -> io::Result<Box<dyn Source>>;
}

/// A readable, seekable stream over one entry's content.
///
/// Seeking past the end is allowed by the stream itself; reads there return
/// zero bytes. The file handle layer enforces its own offset rules on top.
pub trait ReadStream: Read + Seek + Send {
    /// Returns the uncompressed length of the entry.
    fn len(&self) -> u64;

    /// Returns true if the entry is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A writable, seekable stream produced by a writable archive.
pub trait WriteStream: Write + Seek + Send {
    /// Returns the current length of the underlying file.
    fn len(&self) -> io::Result<u64>;

    /// Flushes data and metadata to durable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl WriteStream for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

// ============================================================================
// FileSource
// ============================================================================

/// A source backed by a host file.
///
/// Duplicates reopen the path instead of calling `File::try_clone`, because a
/// cloned descriptor shares its cursor with the original.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Opens a host file read-only.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, path, len })
    }

    /// Returns the host path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Source for FileSource {
    fn len(&self) -> io::Result<u64> {
        Ok(self.len)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Source>> {
        Ok(Box::new(Self::open(&self.path)?))
    }
}

impl ReadStream for FileSource {
    fn len(&self) -> u64 {
        self.len
    }
}

// ============================================================================
// MemorySource
// ============================================================================

/// A source over a shared, immutable byte buffer (or a window of one).
///
/// Duplicates share the buffer; only the cursor is copied.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
    pos: u64,
}

impl MemorySource {
    /// Wraps a whole buffer.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let end = data.len();
        Self {
            data,
            start: 0,
            end,
            pos: 0,
        }
    }

    /// Wraps `len` bytes of a shared buffer starting at `start`.
    ///
    /// The window is clamped to the buffer.
    pub fn window(data: Arc<[u8]>, start: usize, len: usize) -> Self {
        let start = start.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Self {
            data,
            start,
            end,
            pos: 0,
        }
    }

    fn window_len(&self) -> u64 {
        (self.end - self.start) as u64
    }
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.window_len();
        if self.pos >= len {
            return Ok(0);
        }
        let offset = self.start + self.pos as usize;
        let n = buf.len().min(self.end - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MemorySource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.window_len())?;
        Ok(self.pos)
    }
}

impl Source for MemorySource {
    fn len(&self) -> io::Result<u64> {
        Ok(self.window_len())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Source>> {
        let mut dup = self.clone();
        dup.pos = 0;
        Ok(Box::new(dup))
    }
}

impl ReadStream for MemorySource {
    fn len(&self) -> u64 {
        self.window_len()
    }
}

// ============================================================================
// SliceStream
// ============================================================================

/// A stored entry: `len` bytes of a source starting at `start`.
pub struct SliceStream {
    inner: Box<dyn Source>,
    start: u64,
    len: u64,
    pos: u64,
}

impl SliceStream {
    /// Creates a window over `inner`. The caller has validated the bounds.
    pub fn new(inner: Box<dyn Source>, start: u64, len: u64) -> Self {
        Self {
            inner,
            start,
            len,
            pos: 0,
        }
    }
}

impl Read for SliceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let remaining = self.len - self.pos;
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SliceStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }
}

impl ReadStream for SliceStream {
    fn len(&self) -> u64 {
        self.len
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Computes the absolute position for a `SeekFrom` relative to `current` and
/// `len`. Seeking before 0 is an `InvalidInput` error.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(n) => Some(n),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
    };
    target.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek to a negative or overflowing position",
        )
    })
}

/// Reads exactly `buf.len()` bytes at `offset`.
pub(crate) fn read_exact_at<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    buf: &mut [u8],
) -> io::Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(buf)
}

/// Reads `len` bytes at `offset` into a new vector.
pub(crate) fn read_vec_at<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_at(reader, offset, &mut buf)?;
    Ok(buf)
}

#[inline]
pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Decodes a fixed-width, NUL-padded name field.
///
/// Bytes after the first NUL are ignored; non-UTF-8 bytes are replaced.
pub(crate) fn fixed_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_memory_source_read_and_seek() {
        let mut src = MemorySource::new(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        src.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        src.seek(SeekFrom::End(-5)).unwrap();
        let mut rest = String::new();
        src.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "world");
        assert_eq!(Source::len(&src).unwrap(), 11);
    }

    #[test]
    fn test_memory_source_clone_has_own_cursor() {
        let mut src = MemorySource::new(b"abcdef".to_vec());
        src.seek(SeekFrom::Start(4)).unwrap();
        let mut dup = src.try_clone().unwrap();
        let mut buf = [0u8; 2];
        dup.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ab");
        src.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ef");
    }

    #[test]
    fn test_memory_window_is_clamped() {
        let data: Arc<[u8]> = Arc::from(&b"0123456789"[..]);
        let mut win = MemorySource::window(data.clone(), 7, 100);
        assert_eq!(ReadStream::len(&win), 3);
        let mut out = Vec::new();
        win.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"789");

        let win = MemorySource::window(data, 50, 10);
        assert_eq!(ReadStream::len(&win), 0);
    }

    #[test]
    fn test_slice_stream_bounds() {
        let src = MemorySource::new(b"..payload..".to_vec());
        let mut slice = SliceStream::new(Box::new(src), 2, 7);
        let mut out = Vec::new();
        slice.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");

        slice.seek(SeekFrom::Start(3)).unwrap();
        let mut buf = [0u8; 10];
        let n = slice.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"load");

        slice.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(slice.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_negative_seek_rejected() {
        let mut src = MemorySource::new(b"abc".to_vec());
        let err = src.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_file_source_duplicates_independently() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();

        let mut src = FileSource::open(tmp.path()).unwrap();
        assert_eq!(Source::len(&src).unwrap(), 10);
        src.seek(SeekFrom::Start(8)).unwrap();

        let mut dup = src.try_clone().unwrap();
        let mut buf = [0u8; 2];
        dup.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"01");
        src.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"89");
    }

    #[test]
    fn test_fixed_name() {
        assert_eq!(fixed_name(b"MAP01\0\0\0"), "MAP01");
        assert_eq!(fixed_name(b"FULLNAME"), "FULLNAME");
        assert_eq!(fixed_name(b"\0garbage"), "");
    }

    #[test]
    fn test_le_helpers() {
        let buf = [1, 0, 2, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(le_u16(&buf, 0), 1);
        assert_eq!(le_u32(&buf, 2), 2);
        assert_eq!(le_u64(&buf, 6), 3);
    }
}
