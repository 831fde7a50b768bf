//! Decompression codecs shared by the zip and 7z archive formats.
//!
//! Both formats name their compression methods with format-specific ids:
//! zip uses a 16-bit method number, 7z a variable-length byte string. Each
//! plugin translates its id into a [`Method`] and [`build_decoder`] turns that
//! into a boxed [`Decoder`].
//!
//! Optional codecs are feature-gated. Asking for a method whose feature is
//! disabled yields [`Error::UnsupportedMethod`], the same as an unknown id.

mod copy;
#[cfg(feature = "lzma")]
mod filters;
#[cfg(feature = "lzma")]
mod lzma;
#[cfg(feature = "deflate")]
mod deflate;
#[cfg(feature = "bzip2")]
mod bzip2;
#[cfg(feature = "ppmd")]
mod ppmd;

use crate::{Error, Result};
use std::io::Read;

pub use copy::CopyDecoder;

/// A decoder that reads compressed data and produces uncompressed output.
pub trait Decoder: Read + Send {
    /// Returns a human-readable name of the method.
    fn name(&self) -> &'static str;
}

/// 7z method ids.
pub mod method {
    /// Copy (no compression).
    pub const COPY: &[u8] = &[0x00];
    /// LZMA compression.
    pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
    /// LZMA2 compression.
    pub const LZMA2: &[u8] = &[0x21];
    /// Deflate compression.
    pub const DEFLATE: &[u8] = &[0x04, 0x01, 0x08];
    /// BZip2 compression.
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    /// PPMd compression.
    pub const PPMD: &[u8] = &[0x03, 0x04, 0x01];
    /// BCJ (x86) filter.
    pub const BCJ_X86: &[u8] = &[0x03, 0x03, 0x01, 0x03];
    /// BCJ (ARM) filter.
    pub const BCJ_ARM: &[u8] = &[0x03, 0x03, 0x05, 0x01];
    /// BCJ (ARM64/AArch64) filter.
    pub const BCJ_ARM64: &[u8] = &[0x0A];
    /// BCJ (ARM Thumb) filter.
    pub const BCJ_ARM_THUMB: &[u8] = &[0x03, 0x03, 0x07, 0x01];
    /// BCJ (PowerPC) filter.
    pub const BCJ_PPC: &[u8] = &[0x03, 0x03, 0x02, 0x05];
    /// BCJ (SPARC) filter.
    pub const BCJ_SPARC: &[u8] = &[0x03, 0x03, 0x08, 0x05];
    /// BCJ (IA64) filter.
    pub const BCJ_IA64: &[u8] = &[0x03, 0x03, 0x04, 0x01];
    /// BCJ (RISC-V) filter.
    pub const BCJ_RISCV: &[u8] = &[0x0B];
    /// Delta filter.
    pub const DELTA: &[u8] = &[0x03];
    /// AES-256 encryption (recognised only to report it as unsupported).
    pub const AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];
}

/// Zip compression method numbers.
pub mod zip_method {
    /// Stored (no compression).
    pub const STORED: u16 = 0;
    /// Deflate.
    pub const DEFLATE: u16 = 8;
    /// BZip2.
    pub const BZIP2: u16 = 12;
    /// LZMA with the zip-specific property header.
    pub const LZMA: u16 = 14;
}

/// Branch-converter architectures for the BCJ filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcjArch {
    /// x86 / x86-64.
    X86,
    /// 32-bit ARM.
    Arm,
    /// AArch64.
    Arm64,
    /// ARM Thumb.
    ArmThumb,
    /// PowerPC.
    Ppc,
    /// SPARC.
    Sparc,
    /// Itanium.
    Ia64,
    /// RISC-V.
    RiscV,
}

/// A decoding method with its parsed properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Pass-through.
    Copy,
    /// Raw deflate.
    Deflate,
    /// BZip2.
    Bzip2,
    /// LZMA with a properties byte and dictionary size.
    Lzma {
        /// Packed lc/lp/pb byte.
        props: u8,
        /// Dictionary size in bytes.
        dict_size: u32,
    },
    /// LZMA2 with a dictionary size property.
    Lzma2 {
        /// Dictionary size in bytes.
        dict_size: u32,
    },
    /// PPMd variant H.
    Ppmd {
        /// Model order.
        order: u32,
        /// Model memory in bytes.
        mem_size: u32,
    },
    /// Branch converter filter.
    Bcj(BcjArch),
    /// Delta filter.
    Delta {
        /// Byte distance (1-256).
        distance: usize,
    },
}

impl Method {
    /// Parses a 7z coder id and its properties.
    pub fn from_7z(id: &[u8], props: &[u8]) -> Result<Self> {
        let method = match id {
            method::COPY => Self::Copy,
            method::DEFLATE => Self::Deflate,
            method::BZIP2 => Self::Bzip2,
            method::LZMA => {
                if props.len() < 5 {
                    return Err(Error::corrupt("7z", "LZMA properties too short"));
                }
                Self::Lzma {
                    props: props[0],
                    dict_size: crate::source::le_u32(props, 1),
                }
            }
            method::LZMA2 => {
                let prop = *props
                    .first()
                    .ok_or_else(|| Error::corrupt("7z", "LZMA2 properties missing"))?;
                Self::Lzma2 {
                    dict_size: decode_lzma2_dict_size(prop)?,
                }
            }
            method::PPMD => {
                if props.len() < 5 {
                    return Err(Error::corrupt("7z", "PPMd properties too short"));
                }
                Self::Ppmd {
                    order: u32::from(props[0]),
                    mem_size: crate::source::le_u32(props, 1),
                }
            }
            method::BCJ_X86 => Self::Bcj(BcjArch::X86),
            method::BCJ_ARM => Self::Bcj(BcjArch::Arm),
            method::BCJ_ARM64 => Self::Bcj(BcjArch::Arm64),
            method::BCJ_ARM_THUMB => Self::Bcj(BcjArch::ArmThumb),
            method::BCJ_PPC => Self::Bcj(BcjArch::Ppc),
            method::BCJ_SPARC => Self::Bcj(BcjArch::Sparc),
            method::BCJ_IA64 => Self::Bcj(BcjArch::Ia64),
            method::BCJ_RISCV => Self::Bcj(BcjArch::RiscV),
            method::DELTA => Self::Delta {
                distance: props.first().map(|b| usize::from(*b) + 1).unwrap_or(1),
            },
            other => {
                return Err(Error::UnsupportedMethod {
                    format: "7z",
                    method: id_to_u64(other),
                });
            }
        };
        Ok(method)
    }

    /// Returns true for filters, which transform data without compressing it.
    pub fn is_filter(&self) -> bool {
        matches!(self, Self::Bcj(_) | Self::Delta { .. })
    }

    /// Returns a human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Copy => "Copy",
            Self::Deflate => "Deflate",
            Self::Bzip2 => "BZip2",
            Self::Lzma { .. } => "LZMA",
            Self::Lzma2 { .. } => "LZMA2",
            Self::Ppmd { .. } => "PPMd",
            Self::Bcj(BcjArch::X86) => "BCJ (x86)",
            Self::Bcj(BcjArch::Arm) => "BCJ (ARM)",
            Self::Bcj(BcjArch::Arm64) => "BCJ (ARM64)",
            Self::Bcj(BcjArch::ArmThumb) => "BCJ (ARM Thumb)",
            Self::Bcj(BcjArch::Ppc) => "BCJ (PowerPC)",
            Self::Bcj(BcjArch::Sparc) => "BCJ (SPARC)",
            Self::Bcj(BcjArch::Ia64) => "BCJ (IA64)",
            Self::Bcj(BcjArch::RiscV) => "BCJ (RISC-V)",
            Self::Delta { .. } => "Delta",
        }
    }
}

/// Packs a 7z method id into an integer for error reporting.
pub(crate) fn id_to_u64(id: &[u8]) -> u64 {
    id.iter()
        .take(8)
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Decodes the LZMA2 dictionary size from its property byte.
///
/// 0-39 encode 2^(p/2+12) or 3*2^(p/2+11); 40 means 4 GiB - 1.
pub(crate) fn decode_lzma2_dict_size(prop: u8) -> Result<u32> {
    if prop > 40 {
        return Err(Error::corrupt(
            "7z",
            format!("invalid LZMA2 dictionary size property: {}", prop),
        ));
    }
    if prop == 40 {
        return Ok(0xFFFF_FFFF);
    }
    let base_log = u32::from(prop) / 2 + 12;
    Ok(if prop % 2 == 0 {
        1u32 << base_log
    } else {
        3u32 << (base_log - 1)
    })
}

/// Builds a decoder for `method` reading compressed bytes from `input`.
///
/// `uncompressed_size` bounds the output for methods that have no end marker.
/// `format` is only used in error messages.
#[allow(unused_variables)]
pub fn build_decoder<R: Read + Send + 'static>(
    input: R,
    method: &Method,
    uncompressed_size: u64,
    format: &'static str,
) -> Result<Box<dyn Decoder>> {
    match method {
        Method::Copy => Ok(Box::new(CopyDecoder::new(input, uncompressed_size))),

        #[cfg(feature = "deflate")]
        Method::Deflate => Ok(Box::new(deflate::DeflateDecoder::new(
            std::io::BufReader::new(input),
        ))),

        #[cfg(feature = "bzip2")]
        Method::Bzip2 => Ok(Box::new(bzip2::Bzip2Decoder::new(input))),

        #[cfg(feature = "lzma")]
        Method::Lzma { props, dict_size } => Ok(Box::new(lzma::LzmaDecoder::new(
            input,
            *props,
            *dict_size,
            uncompressed_size,
        )?)),

        #[cfg(feature = "lzma")]
        Method::Lzma2 { dict_size } => Ok(Box::new(lzma::Lzma2Decoder::new(input, *dict_size))),

        #[cfg(feature = "ppmd")]
        Method::Ppmd { order, mem_size } => Ok(Box::new(ppmd::PpmdDecoder::new(
            input,
            *order,
            *mem_size,
            uncompressed_size,
        )?)),

        #[cfg(feature = "lzma")]
        Method::Bcj(arch) => Ok(Box::new(filters::BcjDecoder::new(input, *arch))),

        #[cfg(feature = "lzma")]
        Method::Delta { distance } => Ok(Box::new(filters::DeltaDecoder::new(input, *distance))),

        #[allow(unreachable_patterns)]
        other => {
            log::debug!("{} method {} is not compiled in", format, other.name());
            Err(Error::UnsupportedMethod {
                format,
                method: method_code(other),
            })
        }
    }
}

#[allow(dead_code)]
fn method_code(method: &Method) -> u64 {
    let id: &[u8] = match method {
        Method::Copy => method::COPY,
        Method::Deflate => method::DEFLATE,
        Method::Bzip2 => method::BZIP2,
        Method::Lzma { .. } => method::LZMA,
        Method::Lzma2 { .. } => method::LZMA2,
        Method::Ppmd { .. } => method::PPMD,
        Method::Bcj(BcjArch::X86) => method::BCJ_X86,
        Method::Bcj(BcjArch::Arm) => method::BCJ_ARM,
        Method::Bcj(BcjArch::Arm64) => method::BCJ_ARM64,
        Method::Bcj(BcjArch::ArmThumb) => method::BCJ_ARM_THUMB,
        Method::Bcj(BcjArch::Ppc) => method::BCJ_PPC,
        Method::Bcj(BcjArch::Sparc) => method::BCJ_SPARC,
        Method::Bcj(BcjArch::Ia64) => method::BCJ_IA64,
        Method::Bcj(BcjArch::RiscV) => method::BCJ_RISCV,
        Method::Delta { .. } => method::DELTA,
    };
    id_to_u64(id)
}

/// Builds a chain of up to two coders, given in 7z folder order.
///
/// A folder lists `[filter, codec]` but data flows packed, codec, filter,
/// output. `sizes` holds each coder's unpack size in the same order.
pub fn build_decoder_chain<R: Read + Send + 'static>(
    input: R,
    methods: &[Method],
    sizes: &[u64],
    format: &'static str,
) -> Result<Box<dyn Read + Send>> {
    match methods {
        [] => Err(Error::corrupt(format, "folder has no coders")),
        [single] => {
            let size = sizes.first().copied().unwrap_or(0);
            Ok(Box::new(build_decoder(input, single, size, format)?))
        }
        [outer, inner] => {
            let outer_size = sizes.first().copied().unwrap_or(0);
            let inner_size = sizes.get(1).copied().unwrap_or(outer_size);
            let inner_decoder = build_decoder(input, inner, inner_size, format)?;
            Ok(Box::new(build_decoder(
                inner_decoder,
                outer,
                outer_size,
                format,
            )?))
        }
        _ => Err(Error::UnsupportedMethod {
            format,
            method: methods.len() as u64,
        }),
    }
}
