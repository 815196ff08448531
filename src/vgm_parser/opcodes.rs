//! Static VGM opcode table
//!
//! Maps every opcode the decoder understands to its class and payload width.
//! Anything not listed here is an unknown opcode.

use serde::Serialize;

/// Samples per NTSC frame wait (0x62)
pub const NTSC_FRAME_SAMPLES: u64 = 735;
/// Samples per PAL frame wait (0x63)
pub const PAL_FRAME_SAMPLES: u64 = 882;

/// Chip families whose writes are decoded into semantic state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ChipId {
    /// AY-3-8910 / YM2149 tone and noise generator
    #[serde(rename = "PSG")]
    Psg,
    /// Konami K051649 wavetable chip
    #[serde(rename = "SCC")]
    Scc,
    /// YM2413 FM chip
    #[serde(rename = "YM2413")]
    Opll,
    /// Any other chip; writes are recorded but not interpreted
    #[serde(rename = "OTHER")]
    Other,
}

impl ChipId {
    /// Label used in CSV outputs.
    pub fn label(&self) -> &'static str {
        match self {
            ChipId::Psg => "PSG",
            ChipId::Scc => "SCC",
            ChipId::Opll => "YM2413",
            ChipId::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ChipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Opcode classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// 0x66
    EndOfStream,
    /// 0x61 nn nn
    WaitExplicit,
    /// 0x62, 0x63 and 0x70-0x7F
    WaitFixed(u64),
    /// 0x80-0x8F: YM2612 DAC write from the data bank, then wait n samples
    DacWait(u64),
    /// 0x67 0x66 tt ss ss ss ss
    DataBlock,
    /// Register write carrying `payload` bytes after the opcode
    Write {
        /// Chip the write targets
        chip: ChipId,
        /// Payload width in bytes
        payload: usize,
    },
}

/// Look up an opcode. `None` means the byte is not a known command.
pub fn lookup(opcode: u8) -> Option<Opcode> {
    let class = match opcode {
        0x66 => Opcode::EndOfStream,
        0x61 => Opcode::WaitExplicit,
        0x62 => Opcode::WaitFixed(NTSC_FRAME_SAMPLES),
        0x63 => Opcode::WaitFixed(PAL_FRAME_SAMPLES),
        0x70..=0x7F => Opcode::WaitFixed(u64::from(opcode & 0x0F) + 1),
        0x80..=0x8F => Opcode::DacWait(u64::from(opcode & 0x0F)),
        0x67 => Opcode::DataBlock,

        0x51 => Opcode::Write {
            chip: ChipId::Opll,
            payload: 2,
        },
        0xA0 => Opcode::Write {
            chip: ChipId::Psg,
            payload: 2,
        },
        0xD2 => Opcode::Write {
            chip: ChipId::Scc,
            payload: 3,
        },

        // Reserved single-operand range, Game Gear stereo, SN76489
        0x30..=0x3F | 0x4F | 0x50 => other(1),
        // Reserved two-operand range, YM2612/YM2151/.../Y8950 style writes
        0x40..=0x4E | 0x52..=0x5F | 0xA1..=0xBF => other(2),
        // PCM RAM write
        0x68 => other(11),
        // DAC stream control
        0x90 | 0x91 | 0x95 => other(4),
        0x92 => other(5),
        0x93 => other(10),
        0x94 => other(1),
        // Three-operand writes (SegaPCM, RF5C68, ..., ES5506) except SCC
        0xC0..=0xD1 | 0xD3..=0xDF => other(3),
        // PCM seek and four-operand writes
        0xE0..=0xFF => other(4),

        _ => return None,
    };
    Some(class)
}

fn other(payload: usize) -> Opcode {
    Opcode::Write {
        chip: ChipId::Other,
        payload,
    }
}
