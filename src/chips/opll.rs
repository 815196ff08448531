//! YM2413 (OPLL) register tracker
//!
//! Register map for the nine melodic channels:
//! - 0x00-0x07: user instrument patch
//! - 0x0E: rhythm control
//! - 0x10+ch: F-number low 8 bits
//! - 0x20+ch: bit 0 F-number MSB, bits 1-3 block, bit 4 key-on, bit 5 sustain
//! - 0x30+ch: instrument (high nibble), volume attenuation (low nibble)

use serde::Serialize;

use super::Edge;

/// Melodic channels
pub const OPLL_CHANNELS: usize = 9;
/// NTSC colour burst clock
pub const DEFAULT_OPLL_CLOCK: u32 = 3_579_545;
/// Register file size
pub const OPLL_REGISTERS: usize = 0x40;

/// Per-channel register snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpllChannel {
    /// 9-bit F-number
    pub fnum: u16,
    /// Block (octave) 0-7
    pub block: u8,
    /// Key-on bit
    pub key_on: bool,
    /// Sustain bit
    pub sustain: bool,
    /// Instrument 0-15 (0 = user patch)
    pub instrument: u8,
    /// Volume attenuation 0-15 (0 = loudest)
    pub volume: u8,
}

impl OpllChannel {
    /// Loudness on a 0-15 scale (15 = loudest)
    pub fn level(&self) -> u8 {
        15 - (self.volume & 0x0F)
    }
}

/// What an OPLL write changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OpllUpdate {
    /// F-number low byte (0x10-0x18)
    FnumLow {
        /// Channel 0-8
        channel: u8,
        /// F-number after the write
        fnum: u16,
        /// Block
        block: u8,
        /// Pitch in Hz
        hz: f64,
    },
    /// F-number MSB / block / key / sustain (0x20-0x28)
    Control {
        /// Channel 0-8
        channel: u8,
        /// F-number after the write
        fnum: u16,
        /// Block
        block: u8,
        /// Pitch in Hz
        hz: f64,
        /// Key-on bit after the write
        key_on: bool,
        /// Sustain bit
        sustain: bool,
        /// Key-on transition
        key_edge: Edge,
    },
    /// Instrument / volume (0x30-0x38)
    InstVol {
        /// Channel 0-8
        channel: u8,
        /// Instrument after the write
        instrument: u8,
        /// Volume attenuation after the write
        volume: u8,
        /// Instrument before the write
        previous_instrument: u8,
        /// Volume attenuation before the write
        previous_volume: u8,
    },
    /// Rhythm control (0x0E)
    Rhythm {
        /// Raw value
        value: u8,
    },
    /// User patch byte (0x00-0x07)
    UserPatch {
        /// Register
        reg: u8,
        /// Raw value
        value: u8,
    },
    /// Any other register
    Unmapped {
        /// Register
        reg: u8,
    },
}

/// YM2413 state tracker
#[derive(Debug, Clone)]
pub struct OpllTracker {
    regs: [u8; OPLL_REGISTERS],
    channels: [OpllChannel; OPLL_CHANNELS],
    clock: u32,
}

impl OpllTracker {
    /// Create a tracker; a clock of 0 selects [`DEFAULT_OPLL_CLOCK`]
    pub fn new(clock: u32) -> Self {
        OpllTracker {
            regs: [0u8; OPLL_REGISTERS],
            channels: [OpllChannel::default(); OPLL_CHANNELS],
            clock: if clock == 0 { DEFAULT_OPLL_CLOCK } else { clock },
        }
    }

    /// Apply a register write and report what changed
    pub fn write(&mut self, reg: u8, value: u8) -> OpllUpdate {
        let r = usize::from(reg);
        if r >= OPLL_REGISTERS {
            return OpllUpdate::Unmapped { reg };
        }
        self.regs[r] = value;

        match reg {
            0x00..=0x07 => OpllUpdate::UserPatch { reg, value },
            0x0E => OpllUpdate::Rhythm { value },
            0x10..=0x18 => {
                let channel = reg - 0x10;
                let ch = self.refresh(usize::from(channel));
                OpllUpdate::FnumLow {
                    channel,
                    fnum: ch.fnum,
                    block: ch.block,
                    hz: self.fnum_to_hz(ch.fnum, ch.block),
                }
            }
            0x20..=0x28 => {
                let channel = reg - 0x20;
                let before = self.channels[usize::from(channel)].key_on;
                let ch = self.refresh(usize::from(channel));
                OpllUpdate::Control {
                    channel,
                    fnum: ch.fnum,
                    block: ch.block,
                    hz: self.fnum_to_hz(ch.fnum, ch.block),
                    key_on: ch.key_on,
                    sustain: ch.sustain,
                    key_edge: Edge::between(before, ch.key_on),
                }
            }
            0x30..=0x38 => {
                let channel = reg - 0x30;
                let before = self.channels[usize::from(channel)];
                let ch = self.refresh(usize::from(channel));
                OpllUpdate::InstVol {
                    channel,
                    instrument: ch.instrument,
                    volume: ch.volume,
                    previous_instrument: before.instrument,
                    previous_volume: before.volume,
                }
            }
            _ => OpllUpdate::Unmapped { reg },
        }
    }

    /// Re-derive a channel record from the register file
    fn refresh(&mut self, channel: usize) -> OpllChannel {
        let low = self.regs[0x10 + channel];
        let ctrl = self.regs[0x20 + channel];
        let iv = self.regs[0x30 + channel];
        let ch = OpllChannel {
            fnum: (u16::from(ctrl & 0x01) << 8) | u16::from(low),
            block: (ctrl >> 1) & 0x07,
            key_on: ctrl & 0x10 != 0,
            sustain: ctrl & 0x20 != 0,
            instrument: iv >> 4,
            volume: iv & 0x0F,
        };
        self.channels[channel] = ch;
        ch
    }

    /// Pitch for an F-number/block pair
    pub fn fnum_to_hz(&self, fnum: u16, block: u8) -> f64 {
        fnum_to_hz(self.clock, fnum, block)
    }

    /// Channel snapshot
    pub fn channel(&self, channel: usize) -> &OpllChannel {
        &self.channels[channel]
    }

    /// Rhythm mode enabled (0x0E bit 5)
    pub fn rhythm_mode(&self) -> bool {
        self.regs[0x0E] & 0x20 != 0
    }

    /// Raw register file
    pub fn registers(&self) -> &[u8; OPLL_REGISTERS] {
        &self.regs
    }
}

impl Default for OpllTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Pitch in Hz: fnum * (clock / 72) / 2^(19 - block)
pub fn fnum_to_hz(clock: u32, fnum: u16, block: u8) -> f64 {
    let sample_rate = f64::from(clock) / 72.0;
    f64::from(fnum) * sample_rate / f64::from(1u32 << (19 - u32::from(block.min(7))))
}
