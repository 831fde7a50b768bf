//! LZMA and LZMA2 decoders backed by `lzma-rust2`.

use crate::{Error, Result};
use std::io::{self, Read};

use super::Decoder;

/// LZMA decoder.
pub struct LzmaDecoder<R> {
    inner: lzma_rust2::LzmaReader<R>,
}

impl<R> std::fmt::Debug for LzmaDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaDecoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> LzmaDecoder<R> {
    /// Creates a decoder for a raw LZMA stream of known uncompressed size.
    pub fn new(input: R, props: u8, dict_size: u32, uncompressed_size: u64) -> Result<Self> {
        let reader =
            lzma_rust2::LzmaReader::new_with_props(input, uncompressed_size, props, dict_size, None)
                .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;
        Ok(Self { inner: reader })
    }
}

impl<R: Read + Send> Read for LzmaDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for LzmaDecoder<R> {
    fn name(&self) -> &'static str {
        "LZMA"
    }
}

/// LZMA2 decoder.
pub struct Lzma2Decoder<R> {
    inner: lzma_rust2::Lzma2Reader<R>,
}

impl<R> std::fmt::Debug for Lzma2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lzma2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> Lzma2Decoder<R> {
    /// Creates a decoder with an already-decoded dictionary size.
    pub fn new(input: R, dict_size: u32) -> Self {
        Self {
            inner: lzma_rust2::Lzma2Reader::new(input, dict_size, None),
        }
    }
}

impl<R: Read + Send> Read for Lzma2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for Lzma2Decoder<R> {
    fn name(&self) -> &'static str {
        "LZMA2"
    }
}
