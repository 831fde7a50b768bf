//! File handles.
//!
//! A [`File`] is opened through a [`Vfs`](crate::Vfs) and owns its own byte
//! stream, so handles never share a cursor. Every operation first checks
//! that the archive it came from is still mounted and checks again after the
//! I/O; once the archive is unmounted the handle fails with
//! [`Error::HandleInvalidated`].
//!
//! Handles optionally buffer reads and writes ([`File::set_buffer`]) and
//! implement `std::io::{Read, Write, Seek}` for use with other libraries.

use crate::archiver::Archive;
use crate::mount::{Mount, MountState};
use crate::path::VirtualPath;
use crate::source::{ReadStream, WriteStream};
use crate::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How a handle was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only.
    Read,
    /// Write, truncating any existing file.
    Write,
    /// Write, positioned at the end of any existing file.
    Append,
}

enum Stream {
    Read(Box<dyn ReadStream>),
    Write(Box<dyn WriteStream>),
}

/// Keeps the count of open write handles accurate across every exit path.
struct WriterGuard(Arc<AtomicUsize>);

impl WriterGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Handle {
    stream: Stream,
    mode: OpenMode,
    state: Arc<MountState>,
    generation: u64,
    archive: Arc<dyn Archive>,
    relative: VirtualPath,
    /// Logical cursor, including buffered bytes.
    pos: u64,
    buffer_size: usize,
    /// Read-ahead bytes; `read_buf[read_pos..]` starts at `pos`.
    read_buf: Vec<u8>,
    read_pos: usize,
    /// Pending writes, ending at `pos`.
    write_buf: Vec<u8>,
    _writer: Option<WriterGuard>,
}

impl Handle {
    fn check(&self) -> Result<()> {
        self.state.check(self.generation)
    }

    fn flush_writes(&mut self) -> Result<()> {
        if let Stream::Write(stream) = &mut self.stream {
            if !self.write_buf.is_empty() {
                stream.write_all(&self.write_buf).map_err(Error::from_io)?;
                self.write_buf.clear();
            }
        }
        Ok(())
    }

    /// Drops read-ahead and puts the stream back at the logical cursor.
    fn discard_reads(&mut self) -> Result<()> {
        if let Stream::Read(stream) = &mut self.stream {
            if self.read_pos < self.read_buf.len() {
                stream.seek(SeekFrom::Start(self.pos)).map_err(Error::from_io)?;
            }
        }
        self.read_buf.clear();
        self.read_pos = 0;
        Ok(())
    }
}

/// An open file in the virtual filesystem.
///
/// Dropping a `File` closes it. Methods other than [`close`](Self::close)
/// fail with [`Error::HandleClosed`] after the handle has been closed.
pub struct File {
    path: VirtualPath,
    handle: Option<Handle>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("mode", &self.handle.as_ref().map(|h| h.mode))
            .field("pos", &self.handle.as_ref().map(|h| h.pos))
            .finish()
    }
}

impl File {
    pub(crate) fn reader(
        path: VirtualPath,
        mount: &Mount,
        relative: VirtualPath,
        stream: Box<dyn ReadStream>,
        generation: u64,
    ) -> Self {
        Self::with_stream(path, mount, relative, Stream::Read(stream), OpenMode::Read, generation, None)
    }

    pub(crate) fn writer(
        path: VirtualPath,
        mount: &Mount,
        relative: VirtualPath,
        mut stream: Box<dyn WriteStream>,
        mode: OpenMode,
        generation: u64,
        writers: &Arc<AtomicUsize>,
    ) -> Result<Self> {
        let pos = if mode == OpenMode::Append {
            stream.seek(SeekFrom::End(0)).map_err(Error::from_io)?
        } else {
            0
        };
        let mut file = Self::with_stream(
            path,
            mount,
            relative,
            Stream::Write(stream),
            mode,
            generation,
            Some(WriterGuard::new(writers)),
        );
        if let Some(handle) = file.handle.as_mut() {
            handle.pos = pos;
        }
        Ok(file)
    }

    fn with_stream(
        path: VirtualPath,
        mount: &Mount,
        relative: VirtualPath,
        stream: Stream,
        mode: OpenMode,
        generation: u64,
        writer: Option<WriterGuard>,
    ) -> Self {
        Self {
            path,
            handle: Some(Handle {
                stream,
                mode,
                state: Arc::clone(&mount.state),
                generation,
                archive: Arc::clone(&mount.archive),
                relative,
                pos: 0,
                buffer_size: 0,
                read_buf: Vec::new(),
                read_pos: 0,
                write_buf: Vec::new(),
                _writer: writer,
            }),
        }
    }

    fn handle(&self) -> Result<&Handle> {
        let handle = self.handle.as_ref().ok_or(Error::HandleClosed)?;
        handle.check()?;
        Ok(handle)
    }

    fn handle_mut(&mut self) -> Result<&mut Handle> {
        let handle = self.handle.as_mut().ok_or(Error::HandleClosed)?;
        handle.check()?;
        Ok(handle)
    }

    /// Returns the virtual path the file was opened with.
    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    /// Returns the open mode, or `None` once closed.
    pub fn mode(&self) -> Option<OpenMode> {
        self.handle.as_ref().map(|h| h.mode)
    }

    /// Returns true until [`close`](Self::close) is called.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns fewer bytes only when the end of the file is reached. A read
    /// that starts at the end fails with [`Error::Eof`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let path = &self.path;
        let handle = self.handle.as_mut().ok_or(Error::HandleClosed)?;
        handle.check()?;
        let Handle {
            stream,
            pos,
            buffer_size,
            read_buf,
            read_pos,
            ..
        } = &mut *handle;
        let Stream::Read(stream) = stream else {
            return Err(Error::PermissionDenied {
                path: path.as_str().to_string(),
            });
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let len = stream.len();
        if *pos >= len {
            return Err(Error::Eof);
        }

        let mut filled = 0;
        while filled < buf.len() {
            if *read_pos < read_buf.len() {
                let n = (read_buf.len() - *read_pos).min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&read_buf[*read_pos..*read_pos + n]);
                *read_pos += n;
                filled += n;
                *pos += n as u64;
                continue;
            }
            let want = buf.len() - filled;
            if *buffer_size == 0 || want >= *buffer_size {
                let n = read_retrying(stream.as_mut(), &mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
                *pos += n as u64;
            } else {
                read_buf.resize(*buffer_size, 0);
                let n = read_retrying(stream.as_mut(), read_buf)?;
                read_buf.truncate(n);
                *read_pos = 0;
                if n == 0 {
                    break;
                }
            }
        }
        handle.check()?;
        Ok(filled)
    }

    /// Reads exactly `buf.len()` bytes or fails with [`Error::Eof`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..])?;
        }
        Ok(())
    }

    /// Reads everything from the cursor to the end of the file.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.read(&mut chunk) {
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(Error::Eof) => return Ok(out.len() - start),
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes all of `data`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let path = &self.path;
        let handle = self.handle.as_mut().ok_or(Error::HandleClosed)?;
        handle.check()?;
        if !matches!(handle.stream, Stream::Write(_)) {
            return Err(Error::PermissionDenied {
                path: path.as_str().to_string(),
            });
        }
        if handle.buffer_size > 0 && handle.write_buf.len() + data.len() <= handle.buffer_size {
            handle.write_buf.extend_from_slice(data);
        } else {
            handle.flush_writes()?;
            if data.len() >= handle.buffer_size {
                if let Stream::Write(stream) = &mut handle.stream {
                    stream.write_all(data).map_err(Error::from_io)?;
                }
            } else {
                handle.write_buf.extend_from_slice(data);
            }
        }
        handle.pos += data.len() as u64;
        handle.check()?;
        Ok(data.len())
    }

    /// Moves the cursor to `offset` bytes from the start.
    ///
    /// Read handles reject offsets past the end with
    /// [`Error::InvalidOffset`]; write handles may seek past the end, and the
    /// gap is filled with zeros by the next write.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let handle = self.handle_mut()?;
        handle.flush_writes()?;
        match &mut handle.stream {
            Stream::Read(stream) => {
                let length = stream.len();
                if offset > length {
                    return Err(Error::InvalidOffset { offset, length });
                }
                handle.read_buf.clear();
                handle.read_pos = 0;
                stream.seek(SeekFrom::Start(offset)).map_err(Error::from_io)?;
            }
            Stream::Write(stream) => {
                stream.seek(SeekFrom::Start(offset)).map_err(Error::from_io)?;
            }
        }
        handle.pos = offset;
        handle.check()
    }

    /// Returns the cursor position.
    pub fn tell(&self) -> Result<u64> {
        Ok(self.handle()?.pos)
    }

    /// Returns the current length of the file, including buffered writes.
    pub fn length(&self) -> Result<u64> {
        let handle = self.handle()?;
        match &handle.stream {
            Stream::Read(stream) => Ok(stream.len()),
            Stream::Write(stream) => {
                let stored = stream.len().map_err(Error::from_io)?;
                Ok(stored.max(handle.pos))
            }
        }
    }

    /// Returns true if the cursor is at or past the end of the file.
    pub fn eof(&self) -> Result<bool> {
        Ok(self.tell()? >= self.length()?)
    }

    /// Writes out buffered data.
    pub fn flush(&mut self) -> Result<()> {
        let handle = self.handle_mut()?;
        handle.flush_writes()?;
        if let Stream::Write(stream) = &mut handle.stream {
            stream.flush().map_err(Error::from_io)?;
        }
        Ok(())
    }

    /// Flushes buffered data and asks the host to persist it.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(Handle {
            stream: Stream::Write(stream),
            ..
        }) = self.handle.as_mut()
        {
            stream.sync().map_err(Error::from_io)?;
        }
        Ok(())
    }

    /// Sets the buffer size; 0 disables buffering.
    ///
    /// Pending writes are flushed and read-ahead is discarded first.
    pub fn set_buffer(&mut self, size: usize) -> Result<()> {
        let handle = self.handle_mut()?;
        handle.flush_writes()?;
        handle.discard_reads()?;
        handle.buffer_size = size;
        Ok(())
    }

    /// Closes the handle.
    ///
    /// Closing an already closed handle does nothing. Buffered writes are
    /// flushed if the archive is still mounted; the handle is released
    /// regardless of the outcome.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.check().is_err() {
            if !handle.write_buf.is_empty() {
                log::warn!(
                    "{}: dropping {} buffered bytes, archive was unmounted",
                    self.path,
                    handle.write_buf.len()
                );
            }
            return Ok(());
        }
        handle.flush_writes()?;
        if let Stream::Write(stream) = &mut handle.stream {
            stream.flush().map_err(Error::from_io)?;
        }
        Ok(())
    }

    /// Returns the archive and archive-relative path behind a read handle.
    pub(crate) fn archive_entry(&self) -> Result<(Arc<dyn Archive>, VirtualPath)> {
        let handle = self.handle()?;
        if handle.mode != OpenMode::Read {
            return Err(Error::PermissionDenied {
                path: self.path.as_str().to_string(),
            });
        }
        Ok((Arc::clone(&handle.archive), handle.relative.clone()))
    }
}

fn read_retrying(stream: &mut dyn ReadStream, buf: &mut [u8]) -> Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from_io(e)),
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{}: error while closing: {}", self.path, e);
        }
    }
}

macro_rules! endian_io {
    ($($read:ident, $write:ident, $ty:ty, $from:ident, $to:ident;)*) => {
        impl File {
            $(
                #[doc = concat!("Reads a `", stringify!($ty), "` (", stringify!($from), ").")]
                pub fn $read(&mut self) -> Result<$ty> {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    self.read_exact(&mut bytes)?;
                    Ok(<$ty>::$from(bytes))
                }

                #[doc = concat!("Writes a `", stringify!($ty), "` (", stringify!($to), ").")]
                pub fn $write(&mut self, value: $ty) -> Result<()> {
                    self.write(&value.$to())?;
                    Ok(())
                }
            )*
        }
    };
}

endian_io! {
    read_u16_le, write_u16_le, u16, from_le_bytes, to_le_bytes;
    read_u16_be, write_u16_be, u16, from_be_bytes, to_be_bytes;
    read_i16_le, write_i16_le, i16, from_le_bytes, to_le_bytes;
    read_i16_be, write_i16_be, i16, from_be_bytes, to_be_bytes;
    read_u32_le, write_u32_le, u32, from_le_bytes, to_le_bytes;
    read_u32_be, write_u32_be, u32, from_be_bytes, to_be_bytes;
    read_i32_le, write_i32_le, i32, from_le_bytes, to_le_bytes;
    read_i32_be, write_i32_be, i32, from_be_bytes, to_be_bytes;
    read_u64_le, write_u64_le, u64, from_le_bytes, to_le_bytes;
    read_u64_be, write_u64_be, u64, from_be_bytes, to_be_bytes;
    read_i64_le, write_i64_le, i64, from_le_bytes, to_le_bytes;
    read_i64_be, write_i64_be, i64, from_be_bytes, to_be_bytes;
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match File::read(self, buf) {
            Ok(n) => Ok(n),
            Err(Error::Eof) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        File::flush(self).map_err(io::Error::from)
    }
}

impl Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.tell()?.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length()?.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        File::seek(self, target)?;
        Ok(target)
    }
}
