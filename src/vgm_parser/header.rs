//! VGM file header
//!
//! The header is little-endian and at least 0x40 bytes long. Only the fields
//! needed for timing and chip clocks are decoded; everything past 0x40 is
//! optional and read only when the data section starts after it.
//!
//! Layout (offsets in bytes):
//! - 0x00: magic `"Vgm "`
//! - 0x04: EOF offset (relative)
//! - 0x08: version (BCD, e.g. 0x0000_0171 for 1.71)
//! - 0x0C: SN76489 clock
//! - 0x10: YM2413 clock
//! - 0x14: GD3 offset (relative)
//! - 0x18: total samples
//! - 0x1C: loop offset (relative)
//! - 0x20: loop samples
//! - 0x24: playback rate (Hz, 0 = unspecified)
//! - 0x34: data offset (relative to 0x34; 0 means 0x40)
//! - 0x74: AY8910 clock (v1.51+)
//! - 0x9C: K051649 clock (v1.61+)

use nom::bytes::complete::tag;
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use nom::IResult;
use serde::Serialize;

use super::DecodeError;

/// VGM magic identifier
pub const VGM_MAGIC: &[u8; 4] = b"Vgm ";
/// Smallest legal header
pub const MIN_HEADER_LEN: usize = 0x40;
/// Native VGM sample rate; all wait commands count samples at this rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

const DATA_OFFSET_FIELD: usize = 0x34;
const AY8910_CLOCK_FIELD: usize = 0x74;
const K051649_CLOCK_FIELD: usize = 0x9C;
/// Upper clock bits are flags (dual chip, alternate variant)
const CLOCK_MASK: u32 = 0x3FFF_FFFF;

/// Decoded VGM header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VgmHeader {
    /// EOF offset relative to 0x04
    pub eof_offset: u32,
    /// BCD version number
    pub version: u32,
    /// SN76489 clock in Hz (0 = absent)
    pub sn76489_clock: u32,
    /// YM2413 clock in Hz (0 = absent)
    pub ym2413_clock: u32,
    /// GD3 tag offset relative to 0x14
    pub gd3_offset: u32,
    /// Total samples declared by the file
    pub total_samples: u32,
    /// Loop offset relative to 0x1C
    pub loop_offset: u32,
    /// Samples in the loop section
    pub loop_samples: u32,
    /// Playback refresh rate (50/60 Hz), not the sample rate
    pub rate: u32,
    /// Absolute offset of the first command byte
    pub data_offset: usize,
    /// AY8910 clock in Hz (0 = absent)
    pub ay8910_clock: u32,
    /// K051649 clock in Hz (0 = absent)
    pub k051649_clock: u32,
}

type FixedFields = (u32, u32, u32, u32, u32, u32, u32, u32, u32);

fn fixed_fields(input: &[u8]) -> IResult<&[u8], FixedFields> {
    let (rest, _) = tag(&VGM_MAGIC[..])(input)?;
    tuple((
        le_u32, le_u32, le_u32, le_u32, le_u32, le_u32, le_u32, le_u32, le_u32,
    ))(rest)
}

fn u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    le_u32::<_, nom::error::Error<&[u8]>>(bytes)
        .ok()
        .map(|(_, v)| v)
}

impl VgmHeader {
    /// Parse the header from the start of a VGM image.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_HEADER_LEN {
            return Err(DecodeError::InvalidHeader(format!(
                "file too small for VGM header ({} bytes, need {})",
                data.len(),
                MIN_HEADER_LEN
            )));
        }

        let (_, fields) = fixed_fields(data)
            .map_err(|_| DecodeError::InvalidHeader("missing 'Vgm ' magic".to_string()))?;
        let (
            eof_offset,
            version,
            sn76489_clock,
            ym2413_clock,
            gd3_offset,
            total_samples,
            loop_offset,
            loop_samples,
            rate,
        ) = fields;

        let relative = u32_at(data, DATA_OFFSET_FIELD).unwrap_or(0) as usize;
        let data_offset = if relative == 0 {
            MIN_HEADER_LEN
        } else {
            DATA_OFFSET_FIELD + relative
        };
        if data_offset > data.len() {
            return Err(DecodeError::InvalidHeader(format!(
                "data offset 0x{:X} beyond end of file (0x{:X} bytes)",
                data_offset,
                data.len()
            )));
        }

        // Extended clocks live in the header only when the data section starts past them
        let extended = |field: usize| -> u32 {
            if field + 4 <= data_offset {
                u32_at(data, field).unwrap_or(0) & CLOCK_MASK
            } else {
                0
            }
        };

        Ok(VgmHeader {
            eof_offset,
            version,
            sn76489_clock: sn76489_clock & CLOCK_MASK,
            ym2413_clock: ym2413_clock & CLOCK_MASK,
            gd3_offset,
            total_samples,
            loop_offset,
            loop_samples,
            rate,
            data_offset,
            ay8910_clock: extended(AY8910_CLOCK_FIELD),
            k051649_clock: extended(K051649_CLOCK_FIELD),
        })
    }

    /// Version as a `major.minor` string (e.g. "1.71").
    pub fn version_string(&self) -> String {
        let major = format!("{:X}", self.version >> 8);
        format!("{}.{:02X}", major, self.version & 0xFF)
    }
}
