//! PPMd (variant H) decoder.
//!
//! PPMd streams have no end marker, so the decoder stops after the expected
//! number of bytes.

use crate::{Error, Result};
use std::io::{self, Read};

use ppmd_rust::Ppmd7Decoder;
use ppmd_rust::{PPMD7_MAX_MEM_SIZE, PPMD7_MAX_ORDER, PPMD7_MIN_MEM_SIZE, PPMD7_MIN_ORDER};

use super::Decoder;

/// Size-limited PPMd decoder.
pub struct PpmdDecoder<R: Read> {
    inner: Ppmd7Decoder<R>,
    remaining: u64,
}

impl<R: Read> std::fmt::Debug for PpmdDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PpmdDecoder")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Send> PpmdDecoder<R> {
    /// Creates a decoder after validating the model parameters.
    pub fn new(input: R, order: u32, mem_size: u32, uncompressed_size: u64) -> Result<Self> {
        if !(PPMD7_MIN_ORDER..=PPMD7_MAX_ORDER).contains(&order) {
            return Err(Error::corrupt(
                "7z",
                format!(
                    "PPMd order {} out of range [{}-{}]",
                    order, PPMD7_MIN_ORDER, PPMD7_MAX_ORDER
                ),
            ));
        }
        if !(PPMD7_MIN_MEM_SIZE..=PPMD7_MAX_MEM_SIZE).contains(&mem_size) {
            return Err(Error::corrupt(
                "7z",
                format!(
                    "PPMd memory size {} out of range [{}-{}]",
                    mem_size, PPMD7_MIN_MEM_SIZE, PPMD7_MAX_MEM_SIZE
                ),
            ));
        }

        let inner = Ppmd7Decoder::new(input, order, mem_size).map_err(|e| {
            Error::Io(io::Error::new(io::ErrorKind::InvalidData, format!("{:?}", e)))
        })?;

        Ok(Self {
            inner,
            remaining: uncompressed_size,
        })
    }
}

impl<R: Read + Send> Read for PpmdDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max_read = buf
            .len()
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max_read])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: Read + Send> Decoder for PpmdDecoder<R> {
    fn name(&self) -> &'static str {
        "PPMd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_rejects_bad_order() {
        let err = PpmdDecoder::new(Cursor::new(vec![0u8; 8]), 1, 1 << 20, 4).unwrap_err();
        assert!(err.to_string().contains("order"));
    }

    #[test]
    fn test_rejects_bad_memory() {
        let err = PpmdDecoder::new(Cursor::new(vec![0u8; 8]), 6, 16, 4).unwrap_err();
        assert!(err.to_string().contains("memory size"));
    }
}
