//! VGM command stream decoder
//!
//! Walks the command stream after the header in a single forward pass.
//! Wait commands advance the [`SampleClock`]; chip writes become
//! [`ChipCommand`]s stamped with the clock value at the time of the write.

use serde::Serialize;
use tracing::{debug, warn};

use super::header::{VgmHeader, DEFAULT_SAMPLE_RATE};
use super::opcodes::{self, ChipId, Opcode};
use super::sample_clock::{samples_to_seconds, SampleClock};

/// Bytes skipped after an unknown opcode in lenient mode
pub const LENIENT_SKIP: usize = 2;
/// Bytes shown on each side of a failing offset
const CONTEXT_RADIUS: usize = 32;

/// Decoding failures
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Header missing or inconsistent
    #[error("Invalid VGM header: {0}")]
    InvalidHeader(String),

    /// Opcode absent from the opcode table
    #[error("Unsupported VGM command 0x{opcode:02X} at offset 0x{offset:X}\n{context}")]
    UnknownOpcode {
        /// Opcode byte
        opcode: u8,
        /// Absolute byte offset of the opcode
        offset: usize,
        /// Hex dump around the opcode
        context: String,
    },

    /// Command payload runs past the end of the buffer
    #[error(
        "Truncated VGM command 0x{opcode:02X} at offset 0x{offset:X}: \
         need {needed} payload bytes, {available} available\n{context}"
    )]
    Truncated {
        /// Opcode byte
        opcode: u8,
        /// Absolute byte offset of the opcode
        offset: usize,
        /// Payload bytes required
        needed: usize,
        /// Payload bytes left in the buffer
        available: usize,
        /// Hex dump around the opcode
        context: String,
    },

    /// Data block without its 0x66 compatibility marker
    #[error(
        "Malformed data block (0x67 followed by 0x{marker:02X}, expected 0x66) \
         at offset 0x{offset:X}"
    )]
    MalformedDataBlock {
        /// Absolute byte offset of the 0x67 opcode
        offset: usize,
        /// Byte found where 0x66 was expected
        marker: u8,
    },
}

/// Decoder settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Warn and skip instead of failing on unknown or truncated commands
    pub lenient: bool,
    /// Sample rate used to convert sample positions to seconds
    pub sample_rate: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            lenient: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// A decoded register write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "chip", rename_all = "kebab-case")]
pub enum ChipWrite {
    /// AY-3-8910: register, value
    Psg {
        /// Register number
        reg: u8,
        /// Written value
        value: u8,
    },
    /// K051649: port, register, value
    Scc {
        /// Port selector (0 wave, 1 freq, 2 volume, 3 enable)
        port: u8,
        /// Register within the port
        reg: u8,
        /// Written value
        value: u8,
    },
    /// YM2413: register, value
    Opll {
        /// Register number
        reg: u8,
        /// Written value
        value: u8,
    },
    /// Any other chip command, kept verbatim
    Other {
        /// Opcode byte
        opcode: u8,
        /// Raw payload
        payload: Vec<u8>,
    },
}

impl ChipWrite {
    /// Chip family addressed by this write
    pub fn chip(&self) -> ChipId {
        match self {
            ChipWrite::Psg { .. } => ChipId::Psg,
            ChipWrite::Scc { .. } => ChipId::Scc,
            ChipWrite::Opll { .. } => ChipId::Opll,
            ChipWrite::Other { .. } => ChipId::Other,
        }
    }
}

/// A chip write stamped with its stream position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChipCommand {
    /// Absolute byte offset of the opcode
    pub offset: usize,
    /// Sample clock at the time of the write
    pub samples: u64,
    /// The write itself
    pub write: ChipWrite,
}

/// Counters gathered while decoding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// Chip writes emitted (all chips)
    pub chip_writes: usize,
    /// Wait commands applied (including DAC waits)
    pub waits: usize,
    /// Sum of all wait durations
    pub wait_samples: u64,
    /// Data blocks skipped
    pub data_blocks: usize,
    /// Unknown opcodes skipped in lenient mode
    pub unknown_opcodes: usize,
    /// Whether the stream ended on 0x66
    pub end_marker: bool,
}

/// Result of decoding one VGM image
#[derive(Debug, Clone, Serialize)]
pub struct DecodedStream {
    /// Parsed header
    pub header: VgmHeader,
    /// Sample rate used for time conversion
    pub sample_rate: u32,
    /// Chip writes in stream order
    pub commands: Vec<ChipCommand>,
    /// Final sample counter
    pub total_samples: u64,
    /// Decoding counters
    pub stats: DecodeStats,
}

impl DecodedStream {
    /// Seconds at a sample position
    pub fn time_of(&self, samples: u64) -> f64 {
        samples_to_seconds(samples, self.sample_rate)
    }

    /// Total decoded duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.time_of(self.total_samples)
    }

    /// Writes addressed to one chip family
    pub fn commands_for(&self, chip: ChipId) -> impl Iterator<Item = &ChipCommand> {
        self.commands
            .iter()
            .filter(move |cmd| cmd.write.chip() == chip)
    }
}

enum Step {
    Continue,
    Command(ChipCommand),
    End,
}

/// Cursor and clock threaded through the parsing loop
struct DecoderContext<'a> {
    data: &'a [u8],
    cursor: usize,
    clock: SampleClock,
    lenient: bool,
    stats: DecodeStats,
}

impl<'a> DecoderContext<'a> {
    fn new(data: &'a [u8], start: usize, lenient: bool) -> Self {
        DecoderContext {
            data,
            cursor: start,
            clock: SampleClock::new(),
            lenient,
            stats: DecodeStats::default(),
        }
    }

    fn step(&mut self) -> Result<Step, DecodeError> {
        let offset = self.cursor;
        let Some(&opcode) = self.data.get(offset) else {
            warn!(offset, "command stream ended without end-of-data marker");
            return Ok(Step::End);
        };
        self.cursor += 1;

        let Some(class) = opcodes::lookup(opcode) else {
            return self.unknown(opcode, offset);
        };

        match class {
            Opcode::EndOfStream => {
                self.stats.end_marker = true;
                Ok(Step::End)
            }
            Opcode::WaitExplicit => {
                let Some(bytes) = self.payload(opcode, offset, 2)? else {
                    return Ok(Step::End);
                };
                let n = u16::from_le_bytes([bytes[0], bytes[1]]);
                self.wait(u64::from(n));
                Ok(Step::Continue)
            }
            Opcode::WaitFixed(n) | Opcode::DacWait(n) => {
                self.wait(n);
                Ok(Step::Continue)
            }
            Opcode::DataBlock => self.data_block(offset),
            Opcode::Write { chip, payload } => {
                let Some(bytes) = self.payload(opcode, offset, payload)? else {
                    return Ok(Step::End);
                };
                let write = match chip {
                    ChipId::Psg => ChipWrite::Psg {
                        reg: bytes[0],
                        value: bytes[1],
                    },
                    ChipId::Scc => ChipWrite::Scc {
                        port: bytes[0],
                        reg: bytes[1],
                        value: bytes[2],
                    },
                    ChipId::Opll => ChipWrite::Opll {
                        reg: bytes[0],
                        value: bytes[1],
                    },
                    ChipId::Other => ChipWrite::Other {
                        opcode,
                        payload: bytes.to_vec(),
                    },
                };
                self.stats.chip_writes += 1;
                Ok(Step::Command(ChipCommand {
                    offset,
                    samples: self.clock.samples(),
                    write,
                }))
            }
        }
    }

    fn wait(&mut self, n: u64) {
        self.clock.advance(n);
        self.stats.waits += 1;
        self.stats.wait_samples += n;
    }

    /// Take `needed` payload bytes. `Ok(None)` means lenient truncation: stop decoding.
    fn payload(
        &mut self,
        opcode: u8,
        offset: usize,
        needed: usize,
    ) -> Result<Option<&'a [u8]>, DecodeError> {
        let available = self.data.len().saturating_sub(self.cursor);
        if available < needed {
            if self.lenient {
                warn!(
                    opcode, offset, needed, available, "truncated command payload, stopping"
                );
                self.cursor = self.data.len();
                return Ok(None);
            }
            return Err(DecodeError::Truncated {
                opcode,
                offset,
                needed,
                available,
                context: hexdump_context(self.data, offset),
            });
        }
        let data = self.data;
        let bytes = &data[self.cursor..self.cursor + needed];
        self.cursor += needed;
        Ok(Some(bytes))
    }

    fn data_block(&mut self, offset: usize) -> Result<Step, DecodeError> {
        let Some(head) = self.payload(0x67, offset, 6)? else {
            return Ok(Step::End);
        };
        if head[0] != 0x66 {
            if !self.lenient {
                return Err(DecodeError::MalformedDataBlock {
                    offset,
                    marker: head[0],
                });
            }
            warn!(offset, marker = head[0], "malformed data block, skipping");
            self.cursor = offset + 1;
            return self.skip_fixed();
        }
        let block_type = head[1];
        let len = u32::from_le_bytes([head[2], head[3], head[4], head[5]]) as usize;
        if self.payload(0x67, offset, len)?.is_none() {
            return Ok(Step::End);
        }
        self.stats.data_blocks += 1;
        debug!(offset, block_type, len, "skipped data block");
        Ok(Step::Continue)
    }

    fn unknown(&mut self, opcode: u8, offset: usize) -> Result<Step, DecodeError> {
        if !self.lenient {
            return Err(DecodeError::UnknownOpcode {
                opcode,
                offset,
                context: hexdump_context(self.data, offset),
            });
        }
        self.stats.unknown_opcodes += 1;
        warn!(
            opcode,
            offset,
            skip = LENIENT_SKIP,
            "unsupported VGM command, skipping"
        );
        self.skip_fixed()
    }

    fn skip_fixed(&mut self) -> Result<Step, DecodeError> {
        if self.cursor + LENIENT_SKIP > self.data.len() {
            self.cursor = self.data.len();
            return Ok(Step::End);
        }
        self.cursor += LENIENT_SKIP;
        Ok(Step::Continue)
    }
}

/// Decode a complete VGM image.
pub fn decode(data: &[u8], options: &DecodeOptions) -> Result<DecodedStream, DecodeError> {
    let header = VgmHeader::parse(data)?;
    let mut ctx = DecoderContext::new(data, header.data_offset, options.lenient);
    let mut commands = Vec::new();

    loop {
        match ctx.step()? {
            Step::Continue => {}
            Step::Command(cmd) => commands.push(cmd),
            Step::End => break,
        }
    }

    let total_samples = ctx.clock.samples();
    if u64::from(header.total_samples) != total_samples {
        debug!(
            declared = header.total_samples,
            decoded = total_samples,
            "header sample count differs from decoded waits"
        );
    }
    debug!(
        commands = commands.len(),
        waits = ctx.stats.waits,
        total_samples,
        "decoded VGM stream"
    );

    Ok(DecodedStream {
        header,
        sample_rate: options.sample_rate,
        commands,
        total_samples,
        stats: ctx.stats,
    })
}

/// Hex dump of the bytes around `offset`, 16 per row, with a caret under `offset`.
pub fn hexdump_context(data: &[u8], offset: usize) -> String {
    let start = offset.saturating_sub(CONTEXT_RADIUS) & !0xF;
    let end = (offset + CONTEXT_RADIUS + 1).min(data.len());
    let mut out = String::new();
    let mut row = start;
    while row < end {
        let row_end = (row + 16).min(end);
        let hex: Vec<String> = data[row..row_end]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect();
        out.push_str(&format!("{row:08X}  {}\n", hex.join(" ")));
        if (row..row_end).contains(&offset) {
            let pad = 10 + 3 * (offset - row);
            out.push_str(&format!("{}^^\n", " ".repeat(pad)));
        }
        row += 16;
    }
    out
}
