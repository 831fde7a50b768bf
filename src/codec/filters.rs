//! Branch-converter (BCJ) and delta filter decoders.

use std::io::{self, Read};

use lzma_rust2::filter::bcj::BcjReader;
use lzma_rust2::filter::delta::DeltaReader;

use super::{BcjArch, Decoder};

/// BCJ filter decoder for any supported architecture.
pub struct BcjDecoder<R> {
    inner: BcjReader<R>,
    arch: BcjArch,
}

impl<R> std::fmt::Debug for BcjDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BcjDecoder")
            .field("arch", &self.arch)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Send> BcjDecoder<R> {
    /// Creates a decoder starting at stream position 0.
    pub fn new(input: R, arch: BcjArch) -> Self {
        let inner = match arch {
            BcjArch::X86 => BcjReader::new_x86(input, 0),
            BcjArch::Arm => BcjReader::new_arm(input, 0),
            BcjArch::Arm64 => BcjReader::new_arm64(input, 0),
            BcjArch::ArmThumb => BcjReader::new_arm_thumb(input, 0),
            BcjArch::Ppc => BcjReader::new_ppc(input, 0),
            BcjArch::Sparc => BcjReader::new_sparc(input, 0),
            BcjArch::Ia64 => BcjReader::new_ia64(input, 0),
            BcjArch::RiscV => BcjReader::new_riscv(input, 0),
        };
        Self { inner, arch }
    }
}

impl<R: Read + Send> Read for BcjDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for BcjDecoder<R> {
    fn name(&self) -> &'static str {
        "BCJ"
    }
}

/// Delta filter decoder.
pub struct DeltaDecoder<R> {
    inner: DeltaReader<R>,
}

impl<R> std::fmt::Debug for DeltaDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaDecoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> DeltaDecoder<R> {
    /// Creates a decoder with the given byte distance (1-256).
    pub fn new(input: R, distance: usize) -> Self {
        Self {
            inner: DeltaReader::new(input, distance.clamp(1, 256)),
        }
    }
}

impl<R: Read + Send> Read for DeltaDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for DeltaDecoder<R> {
    fn name(&self) -> &'static str {
        "Delta"
    }
}
