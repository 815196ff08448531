//! AY-3-8910 / YM2149 register tracker
//!
//! Register map:
//! - R0/R1, R2/R3, R4/R5: tone period fine (8 bits) / coarse (4 bits) for A/B/C
//! - R6: noise period
//! - R7: mixer control (active-low tone/noise enables)
//! - R8/R9/R10: channel level (bits 0-3) and envelope mode (bit 4)
//! - R11-R13: envelope period and shape
//! - R14/R15: I/O ports

use bitflags::bitflags;
use serde::Serialize;

use super::Edge;

/// Number of tone channels
pub const PSG_CHANNELS: usize = 3;
/// MSX PSG clock (colour burst / 2)
pub const DEFAULT_PSG_CLOCK: u32 = 1_789_772;
/// Mixer value most BIOSes leave behind: all tones on, all noise off, port B out
pub const INITIAL_MIXER: u8 = 0xB8;

bitflags! {
    /// Mixer Control Register (R7) bitflags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MixerFlags: u8 {
        /// Channel A tone disable (1 = disable, 0 = enable)
        const CH_A_TONE = 0x01;
        /// Channel B tone disable
        const CH_B_TONE = 0x02;
        /// Channel C tone disable
        const CH_C_TONE = 0x04;
        /// Channel A noise disable (1 = disable, 0 = enable)
        const CH_A_NOISE = 0x08;
        /// Channel B noise disable
        const CH_B_NOISE = 0x10;
        /// Channel C noise disable
        const CH_C_NOISE = 0x20;
    }
}

impl MixerFlags {
    /// Create mixer flags from raw register value
    pub fn from_register(value: u8) -> Self {
        MixerFlags::from_bits_truncate(value)
    }

    /// Tone enabled for channel 0..3
    pub fn tone_enabled(&self, channel: usize) -> bool {
        channel < PSG_CHANNELS && !self.contains(MixerFlags::from_bits_truncate(0x01u8 << channel))
    }

    /// Noise enabled for channel 0..3
    pub fn noise_enabled(&self, channel: usize) -> bool {
        channel < PSG_CHANNELS && !self.contains(MixerFlags::from_bits_truncate(0x08u8 << channel))
    }
}

/// Per-channel register snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsgChannel {
    /// Tone period low byte
    pub fine: u8,
    /// Tone period high nibble
    pub coarse: u8,
    /// Level 0-15
    pub level: u8,
    /// Level driven by the envelope generator
    pub envelope_mode: bool,
}

impl PsgChannel {
    /// 12-bit tone period
    pub fn period(&self) -> u16 {
        (u16::from(self.coarse & 0x0F) << 8) | u16::from(self.fine)
    }
}

/// What a PSG write changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PsgUpdate {
    /// Tone period fine/coarse write
    Tone {
        /// Channel 0-2
        channel: u8,
        /// 12-bit tone period after the write
        period: u16,
        /// Tone frequency in Hz
        hz: f64,
    },
    /// Mixer (R7) write
    Mixer {
        /// Raw R7 value
        reg7: u8,
        /// Tone enable per channel after the write
        tone_enabled: [bool; PSG_CHANNELS],
        /// Noise enable per channel after the write
        noise_enabled: [bool; PSG_CHANNELS],
        /// Tone enable transitions
        tone_edges: [Edge; PSG_CHANNELS],
    },
    /// Level write (R8-R10)
    Volume {
        /// Channel 0-2
        channel: u8,
        /// Level 0-15 after the write
        level: u8,
        /// Level before the write
        previous: u8,
        /// Envelope mode bit
        envelope: bool,
        /// Tone enabled on this channel
        tone_enabled: bool,
    },
    /// Noise, envelope or I/O register
    Other {
        /// Register number
        reg: u8,
        /// Written value
        value: u8,
    },
}

/// AY-3-8910 state tracker
#[derive(Debug, Clone)]
pub struct PsgTracker {
    regs: [u8; 16],
    channels: [PsgChannel; PSG_CHANNELS],
    mixer: MixerFlags,
    clock: u32,
}

impl PsgTracker {
    /// Create a tracker; a clock of 0 selects [`DEFAULT_PSG_CLOCK`]
    pub fn new(clock: u32) -> Self {
        let mut regs = [0u8; 16];
        regs[7] = INITIAL_MIXER;
        PsgTracker {
            regs,
            channels: [PsgChannel::default(); PSG_CHANNELS],
            mixer: MixerFlags::from_register(INITIAL_MIXER),
            clock: if clock == 0 { DEFAULT_PSG_CLOCK } else { clock },
        }
    }

    /// Apply a register write and report what changed
    pub fn write(&mut self, reg: u8, value: u8) -> PsgUpdate {
        if let Some(slot) = self.regs.get_mut(usize::from(reg)) {
            *slot = value;
        }

        match reg {
            0..=5 => {
                let ch = usize::from(reg / 2);
                if reg % 2 == 0 {
                    self.channels[ch].fine = value;
                } else {
                    self.channels[ch].coarse = value & 0x0F;
                }
                let period = self.channels[ch].period();
                PsgUpdate::Tone {
                    channel: ch as u8,
                    period,
                    hz: self.period_to_hz(period),
                }
            }
            7 => {
                let before = self.mixer;
                self.mixer = MixerFlags::from_register(value);
                let tone_enabled: [bool; PSG_CHANNELS] =
                    std::array::from_fn(|ch| self.mixer.tone_enabled(ch));
                PsgUpdate::Mixer {
                    reg7: value,
                    tone_enabled,
                    noise_enabled: std::array::from_fn(|ch| self.mixer.noise_enabled(ch)),
                    tone_edges: std::array::from_fn(|ch| {
                        Edge::between(before.tone_enabled(ch), tone_enabled[ch])
                    }),
                }
            }
            8..=10 => {
                let ch = usize::from(reg - 8);
                let previous = self.channels[ch].level;
                self.channels[ch].level = value & 0x0F;
                self.channels[ch].envelope_mode = value & 0x10 != 0;
                PsgUpdate::Volume {
                    channel: ch as u8,
                    level: self.channels[ch].level,
                    previous,
                    envelope: self.channels[ch].envelope_mode,
                    tone_enabled: self.mixer.tone_enabled(ch),
                }
            }
            _ => PsgUpdate::Other { reg, value },
        }
    }

    /// Tone frequency for a 12-bit period; period 0 behaves as 1
    pub fn period_to_hz(&self, period: u16) -> f64 {
        f64::from(self.clock) / (16.0 * f64::from(period.max(1)))
    }

    /// Channel snapshot
    pub fn channel(&self, channel: usize) -> &PsgChannel {
        &self.channels[channel]
    }

    /// Current tone frequency of a channel
    pub fn tone_hz(&self, channel: usize) -> f64 {
        self.period_to_hz(self.channels[channel].period())
    }

    /// Current mixer flags
    pub fn mixer(&self) -> MixerFlags {
        self.mixer
    }

    /// Raw register file
    pub fn registers(&self) -> &[u8; 16] {
        &self.regs
    }
}

impl Default for PsgTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mixer_flags() {
        let flags = MixerFlags::from_register(0x00);
        assert!(flags.tone_enabled(0));
        assert!(flags.tone_enabled(1));
        assert!(flags.tone_enabled(2));
        assert!(flags.noise_enabled(2));
    }

    #[test]
    fn test_mixer_flags_disabled() {
        let flags = MixerFlags::from_register(0xFF);
        assert!(!flags.tone_enabled(0));
        assert!(!flags.tone_enabled(1));
        assert!(!flags.tone_enabled(2));
        assert!(!flags.noise_enabled(0));
        assert!(!flags.tone_enabled(3));
    }

    #[test]
    fn test_tone_period_composes_fine_and_coarse() {
        let mut psg = PsgTracker::default();
        psg.write(2, 0xFE);
        let update = psg.write(3, 0xF1);
        match update {
            PsgUpdate::Tone {
                channel,
                period,
                hz,
            } => {
                assert_eq!(channel, 1);
                assert_eq!(period, 0x1FE);
                assert_relative_eq!(hz, 1_789_772.0 / (16.0 * 510.0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(psg.channel(1).coarse, 0x01);
    }

    #[test]
    fn test_zero_period_is_highest_tone() {
        let psg = PsgTracker::default();
        assert_relative_eq!(psg.tone_hz(0), 1_789_772.0 / 16.0);
    }

    #[test]
    fn test_volume_reports_previous_level() {
        let mut psg = PsgTracker::default();
        psg.write(8, 0x0C);
        let update = psg.write(8, 0x13);
        assert_eq!(
            update,
            PsgUpdate::Volume {
                channel: 0,
                level: 3,
                previous: 12,
                envelope: true,
                tone_enabled: true,
            }
        );
    }

    #[test]
    fn test_mixer_edges() {
        let mut psg = PsgTracker::default();
        let update = psg.write(7, 0xB9);
        match update {
            PsgUpdate::Mixer {
                tone_enabled,
                tone_edges,
                ..
            } => {
                assert_eq!(tone_enabled, [false, true, true]);
                assert_eq!(tone_edges, [Edge::Falling, Edge::None, Edge::None]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match psg.write(7, 0xB8) {
            PsgUpdate::Mixer { tone_edges, .. } => {
                assert_eq!(tone_edges[0], Edge::Rising);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_other_registers() {
        let mut psg = PsgTracker::default();
        assert_eq!(
            psg.write(13, 0x0E),
            PsgUpdate::Other {
                reg: 13,
                value: 0x0E
            }
        );
        assert_eq!(psg.registers()[13], 0x0E);
    }
}
