//! VGM log parsing
//!
//! Decodes VGM (Video Game Music) register logs into a flat list of
//! timestamped chip writes. Supports the AY-3-8910, K051649 and YM2413
//! write commands plus every standard wait, data block and skip command.

pub mod decoder;
pub mod header;
pub mod opcodes;
pub mod sample_clock;

pub use decoder::{
    decode, hexdump_context, ChipCommand, ChipWrite, DecodeError, DecodeOptions, DecodeStats,
    DecodedStream,
};
pub use header::{VgmHeader, DEFAULT_SAMPLE_RATE};
pub use opcodes::ChipId;
pub use sample_clock::{samples_to_seconds, SampleClock};

/// Read and decode a VGM file from disk.
pub fn load_file(
    path: impl AsRef<std::path::Path>,
    options: &DecodeOptions,
) -> crate::Result<DecodedStream> {
    let data = std::fs::read(path.as_ref())?;
    Ok(decode(&data, options)?)
}
