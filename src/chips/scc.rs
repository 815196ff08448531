//! Konami K051649 (SCC) register tracker
//!
//! VGM addresses the chip through four ports, mapped here onto the
//! cartridge memory window:
//! - port 0: wavetable, 0x9800 + reg (32 bytes per channel, channels 0-3)
//! - port 1: frequency pairs, 0x9880 + reg (low byte, high nibble)
//! - port 2: volume, 0x988A + reg
//! - port 3: channel enable bitfield, 0x988F

use serde::Serialize;

use super::Edge;

/// Number of channels
pub const SCC_CHANNELS: usize = 5;
/// SCC clock on MSX
pub const DEFAULT_SCC_CLOCK: u32 = 1_789_772;

const WAVE_BASE: u32 = 0x9800;
const WAVE_END: u32 = 0x987F;
const FREQ_BASE: u32 = 0x9880;
const FREQ_END: u32 = 0x9889;
const VOLUME_BASE: u32 = 0x988A;
const VOLUME_END: u32 = 0x988E;
const ENABLE_ADDR: u32 = 0x988F;

/// Memory-mapped address for a VGM port/register pair
pub fn absolute_address(port: u8, reg: u8) -> u32 {
    let base = match port {
        0 => WAVE_BASE,
        1 => FREQ_BASE,
        2 => VOLUME_BASE,
        3 => ENABLE_ADDR,
        _ => return (u32::from(port) << 8) | u32::from(reg),
    };
    base + u32::from(reg)
}

/// Register class of a memory-mapped address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SccRegister {
    /// Wavetable byte
    Wave {
        /// Channel owning the table
        channel: u8,
        /// Byte index 0-31
        index: u8,
    },
    /// Frequency divider low byte
    FreqLow {
        /// Channel 0-4
        channel: u8,
    },
    /// Frequency divider high nibble
    FreqHigh {
        /// Channel 0-4
        channel: u8,
    },
    /// Channel volume
    Volume {
        /// Channel 0-4
        channel: u8,
    },
    /// Enable bitfield
    Enable,
    /// Deformation/test or out-of-range address
    Unmapped,
}

impl SccRegister {
    /// Classify a memory-mapped address
    pub fn classify(addr: u32) -> Self {
        match addr {
            WAVE_BASE..=WAVE_END => {
                let offset = addr - WAVE_BASE;
                SccRegister::Wave {
                    channel: (offset / 32) as u8,
                    index: (offset % 32) as u8,
                }
            }
            FREQ_BASE..=FREQ_END => {
                let offset = addr - FREQ_BASE;
                let channel = (offset / 2) as u8;
                if offset % 2 == 0 {
                    SccRegister::FreqLow { channel }
                } else {
                    SccRegister::FreqHigh { channel }
                }
            }
            VOLUME_BASE..=VOLUME_END => SccRegister::Volume {
                channel: (addr - VOLUME_BASE) as u8,
            },
            ENABLE_ADDR => SccRegister::Enable,
            _ => SccRegister::Unmapped,
        }
    }
}

/// Per-channel register snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SccChannel {
    /// Divider low byte
    pub freq_low: u8,
    /// Divider high nibble
    pub freq_high: u8,
    /// Volume 0-15
    pub volume: u8,
    /// Enable bit
    pub enabled: bool,
}

impl SccChannel {
    /// 12-bit frequency divider
    pub fn divider(&self) -> u16 {
        (u16::from(self.freq_high & 0x0F) << 8) | u16::from(self.freq_low)
    }
}

/// What an SCC write changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SccUpdate {
    /// Wavetable byte
    Wave {
        /// Channel owning the table
        channel: u8,
        /// Byte index 0-31
        index: u8,
    },
    /// Frequency low/high write
    Frequency {
        /// Channel 0-4
        channel: u8,
        /// 12-bit divider after the write
        divider: u16,
        /// Output frequency in Hz
        hz: f64,
    },
    /// Volume write
    Volume {
        /// Channel 0-4
        channel: u8,
        /// Volume after the write
        level: u8,
        /// Volume before the write
        previous: u8,
        /// Channel enable bit
        enabled: bool,
    },
    /// Enable bitfield write
    Enable {
        /// Raw bitfield
        enable_bits: u8,
        /// Enable transitions per channel
        edges: [Edge; SCC_CHANNELS],
    },
    /// Unmapped address
    Unmapped {
        /// Memory-mapped address
        address: u32,
    },
}

/// K051649 state tracker
#[derive(Debug, Clone)]
pub struct SccTracker {
    waves: [[u8; 32]; 4],
    channels: [SccChannel; SCC_CHANNELS],
    clock: u32,
}

impl SccTracker {
    /// Create a tracker; a clock of 0 selects [`DEFAULT_SCC_CLOCK`]
    pub fn new(clock: u32) -> Self {
        SccTracker {
            waves: [[0u8; 32]; 4],
            channels: [SccChannel::default(); SCC_CHANNELS],
            clock: if clock == 0 { DEFAULT_SCC_CLOCK } else { clock },
        }
    }

    /// Apply a port/register write and report what changed
    pub fn write(&mut self, port: u8, reg: u8, value: u8) -> SccUpdate {
        let address = absolute_address(port, reg);
        match SccRegister::classify(address) {
            SccRegister::Wave { channel, index } => {
                self.waves[usize::from(channel)][usize::from(index)] = value;
                SccUpdate::Wave { channel, index }
            }
            SccRegister::FreqLow { channel } | SccRegister::FreqHigh { channel } => {
                let ch = &mut self.channels[usize::from(channel)];
                if address % 2 == 0 {
                    ch.freq_low = value;
                } else {
                    ch.freq_high = value & 0x0F;
                }
                let divider = ch.divider();
                SccUpdate::Frequency {
                    channel,
                    divider,
                    hz: self.divider_to_hz(divider),
                }
            }
            SccRegister::Volume { channel } => {
                let ch = &mut self.channels[usize::from(channel)];
                let previous = ch.volume;
                ch.volume = value & 0x0F;
                SccUpdate::Volume {
                    channel,
                    level: ch.volume,
                    previous,
                    enabled: ch.enabled,
                }
            }
            SccRegister::Enable => {
                let edges = std::array::from_fn(|i| {
                    let now = value & (1 << i) != 0;
                    let edge = Edge::between(self.channels[i].enabled, now);
                    self.channels[i].enabled = now;
                    edge
                });
                SccUpdate::Enable {
                    enable_bits: value,
                    edges,
                }
            }
            SccRegister::Unmapped => SccUpdate::Unmapped { address },
        }
    }

    /// Output frequency for a divider
    pub fn divider_to_hz(&self, divider: u16) -> f64 {
        f64::from(self.clock) / (32.0 * (f64::from(divider) + 1.0))
    }

    /// Channel snapshot
    pub fn channel(&self, channel: usize) -> &SccChannel {
        &self.channels[channel]
    }

    /// Current frequency of a channel
    pub fn channel_hz(&self, channel: usize) -> f64 {
        self.divider_to_hz(self.channels[channel].divider())
    }

    /// Wavetable for channels 0-3 (channel 4 shares table 3)
    pub fn wave(&self, channel: usize) -> &[u8; 32] {
        &self.waves[channel.min(3)]
    }
}

impl Default for SccTracker {
    fn default() -> Self {
        Self::new(0)
    }
}
