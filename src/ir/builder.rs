//! IR builder
//!
//! Feeds decoded commands through the chip trackers in stream order, records
//! one Event per write and drives one [`NoteGate`] per chip channel:
//!
//! - PSG: opens on level rising from 0 with tone enabled, or tone re-enabled
//!   with a non-zero level; closes on level 0 or tone muted.
//! - SCC: opens on volume rising from 0 with the channel enabled, or enable
//!   rising with a non-zero volume; closes on volume 0 or enable cleared.
//! - OPLL: opens on key-on rising edge, closes on the falling edge.
//!
//! Every open note also retriggers on a pitch jump of at least
//! [`FREQ_CHANGE_THRESHOLD`]. On YM2413 channels only the control register
//! write (F-number MSB/block/key) can retrigger, since the low byte alone
//! is a half-written F-number.

use tracing::debug;

use crate::chips::opll::OPLL_CHANNELS;
use crate::chips::psg::PSG_CHANNELS;
use crate::chips::scc::{absolute_address, SCC_CHANNELS};
use crate::chips::{ChipTrackers, ChipUpdate, Edge, OpllUpdate, PsgUpdate, SccUpdate};
use crate::vgm_parser::{
    samples_to_seconds, ChipCommand, ChipId, ChipWrite, DecodedStream, VgmHeader,
};

use super::note_gate::NoteGate;
use super::opll_slices::OpllSlicer;
use super::{Event, EventDetail, EventKind, IrDocument, IrHeader, Note, NoteCause};

/// Relative pitch change that counts as a new note
pub const FREQ_CHANGE_THRESHOLD: f64 = 0.20;

/// Single-pass Event/Note builder
#[derive(Debug, Clone)]
pub struct IrBuilder {
    sample_rate: u32,
    freq_threshold: f64,
    trackers: ChipTrackers,
    psg_gates: [NoteGate; PSG_CHANNELS],
    scc_gates: [NoteGate; SCC_CHANNELS],
    opll_gates: [NoteGate; OPLL_CHANNELS],
    slicer: OpllSlicer,
    events: Vec<Event>,
    notes: Vec<Note>,
}

impl IrBuilder {
    /// Builder with trackers clocked from `header`
    pub fn new(header: &VgmHeader, sample_rate: u32) -> Self {
        let gates = |chip: ChipId| move |ch: usize| NoteGate::new(chip, ch as u8, sample_rate);
        IrBuilder {
            sample_rate,
            freq_threshold: FREQ_CHANGE_THRESHOLD,
            trackers: ChipTrackers::from_header(header),
            psg_gates: std::array::from_fn(gates(ChipId::Psg)),
            scc_gates: std::array::from_fn(gates(ChipId::Scc)),
            opll_gates: std::array::from_fn(gates(ChipId::Opll)),
            slicer: OpllSlicer::new(),
            events: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Builder for a decoded stream
    pub fn from_stream(stream: &DecodedStream) -> Self {
        Self::new(&stream.header, stream.sample_rate)
    }

    /// Override the retrigger threshold
    pub fn with_freq_threshold(mut self, threshold: f64) -> Self {
        self.freq_threshold = threshold;
        self
    }

    /// Process every command of `stream` and close at its final sample
    pub fn build(mut self, stream: &DecodedStream) -> IrDocument {
        for cmd in &stream.commands {
            self.push(cmd);
        }
        self.finish(&stream.header, stream.total_samples)
    }

    /// Process one command
    pub fn push(&mut self, cmd: &ChipCommand) {
        let samples = cmd.samples;
        let time_s = samples_to_seconds(samples, self.sample_rate);

        let Some(update) = self.trackers.apply(&cmd.write) else {
            if let ChipWrite::Other { opcode, payload } = &cmd.write {
                self.events.push(Event {
                    time_s,
                    samples,
                    chip: ChipId::Other,
                    channel: None,
                    kind: EventKind::Unsupported,
                    address: None,
                    value: None,
                    detail: EventDetail::Raw {
                        opcode: *opcode,
                        payload: payload.clone(),
                    },
                });
            }
            return;
        };

        let (address, value) = match cmd.write {
            ChipWrite::Psg { reg, value } | ChipWrite::Opll { reg, value } => {
                (Some(u32::from(reg)), Some(value))
            }
            ChipWrite::Scc { port, reg, value } => (Some(absolute_address(port, reg)), Some(value)),
            ChipWrite::Other { .. } => (None, None),
        };
        let kind = match update {
            ChipUpdate::Scc(SccUpdate::Wave { .. }) => EventKind::WaveWrite,
            _ => EventKind::RegWrite,
        };
        self.events.push(Event {
            time_s,
            samples,
            chip: cmd.write.chip(),
            channel: update_channel(&update),
            kind,
            address,
            value,
            detail: EventDetail::Chip(update.clone()),
        });

        match update {
            ChipUpdate::Psg(u) => self.on_psg(samples, &u),
            ChipUpdate::Scc(u) => self.on_scc(samples, &u),
            ChipUpdate::Opll(u) => self.on_opll(samples, &u),
        }
    }

    fn emit(&mut self, note: Option<Note>) {
        if let Some(note) = note {
            self.notes.push(note);
        }
    }

    fn on_psg(&mut self, samples: u64, update: &PsgUpdate) {
        match *update {
            PsgUpdate::Tone { channel, hz, .. } => {
                let ch = usize::from(channel);
                let closed = self.psg_gates[ch].retune(samples, hz, self.freq_threshold, true);
                self.emit(closed);
            }
            PsgUpdate::Mixer { tone_edges, .. } => {
                for (ch, edge) in tone_edges.into_iter().enumerate() {
                    let closed = match edge {
                        Edge::Falling => self.psg_gates[ch].stop(samples, NoteCause::ToneMuted),
                        Edge::Rising if self.trackers.psg.channel(ch).level > 0 => {
                            let hz = self.trackers.psg.tone_hz(ch);
                            let level = self.trackers.psg.channel(ch).level;
                            self.psg_gates[ch].start(
                                samples,
                                Some(hz),
                                Some(level),
                                NoteCause::EnableOn,
                            )
                        }
                        _ => None,
                    };
                    self.emit(closed);
                }
            }
            PsgUpdate::Volume {
                channel,
                level,
                previous,
                tone_enabled,
                ..
            } => {
                let ch = usize::from(channel);
                let closed = if level == 0 {
                    self.psg_gates[ch].stop(samples, NoteCause::VolZero)
                } else if previous == 0 && tone_enabled {
                    let hz = self.trackers.psg.tone_hz(ch);
                    self.psg_gates[ch].start(samples, Some(hz), Some(level), NoteCause::VolRise)
                } else {
                    None
                };
                self.emit(closed);
            }
            PsgUpdate::Other { .. } => {}
        }
    }

    fn on_scc(&mut self, samples: u64, update: &SccUpdate) {
        match *update {
            SccUpdate::Frequency { channel, hz, .. } => {
                let ch = usize::from(channel);
                let closed = self.scc_gates[ch].retune(samples, hz, self.freq_threshold, true);
                self.emit(closed);
            }
            SccUpdate::Volume {
                channel,
                level,
                previous,
                enabled,
            } => {
                let ch = usize::from(channel);
                let closed = if level == 0 {
                    self.scc_gates[ch].stop(samples, NoteCause::VolZero)
                } else if previous == 0 && enabled {
                    let hz = self.trackers.scc.channel_hz(ch);
                    self.scc_gates[ch].start(samples, Some(hz), Some(level), NoteCause::VolRise)
                } else {
                    None
                };
                self.emit(closed);
            }
            SccUpdate::Enable { edges, .. } => {
                for (ch, edge) in edges.into_iter().enumerate() {
                    let volume = self.trackers.scc.channel(ch).volume;
                    let closed = match edge {
                        Edge::Falling => self.scc_gates[ch].stop(samples, NoteCause::EnableOff),
                        Edge::Rising if volume > 0 => {
                            let hz = self.trackers.scc.channel_hz(ch);
                            self.scc_gates[ch].start(
                                samples,
                                Some(hz),
                                Some(volume),
                                NoteCause::EnableOn,
                            )
                        }
                        _ => None,
                    };
                    self.emit(closed);
                }
            }
            SccUpdate::Wave { .. } | SccUpdate::Unmapped { .. } => {}
        }
    }

    fn on_opll(&mut self, samples: u64, update: &OpllUpdate) {
        let channel = match *update {
            OpllUpdate::FnumLow { channel, .. }
            | OpllUpdate::Control { channel, .. }
            | OpllUpdate::InstVol { channel, .. } => usize::from(channel),
            _ => return,
        };
        let state = *self.trackers.opll.channel(channel);
        self.slicer.observe(samples, update, &state);

        let closed = match *update {
            OpllUpdate::Control { key_edge, hz, .. } => match key_edge {
                Edge::Rising => self.opll_gates[channel].start(
                    samples,
                    Some(hz),
                    Some(state.level()),
                    NoteCause::KeyOn,
                ),
                Edge::Falling => self.opll_gates[channel].stop(samples, NoteCause::KeyOff),
                Edge::None => {
                    self.opll_gates[channel].retune(samples, hz, self.freq_threshold, true)
                }
            },
            OpllUpdate::FnumLow { hz, .. } => {
                self.opll_gates[channel].retune(samples, hz, self.freq_threshold, false)
            }
            _ => None,
        };
        self.emit(closed);
    }

    /// Close every open note at `end_samples` and assemble the document
    pub fn finish(mut self, header: &VgmHeader, end_samples: u64) -> IrDocument {
        let mut closed = Vec::new();
        for gate in self
            .psg_gates
            .iter_mut()
            .chain(self.scc_gates.iter_mut())
            .chain(self.opll_gates.iter_mut())
        {
            closed.extend(gate.stop(end_samples, NoteCause::Eof));
        }
        self.notes.extend(closed);

        let (opll_gates, opll_slices) = self.slicer.finish(end_samples);
        debug!(
            events = self.events.len(),
            notes = self.notes.len(),
            opll_gates = opll_gates.len(),
            "built IR"
        );
        IrDocument {
            header: IrHeader::new(header, self.sample_rate, end_samples),
            events: self.events,
            notes: self.notes,
            opll_gates,
            opll_slices,
        }
    }
}

fn update_channel(update: &ChipUpdate) -> Option<u8> {
    match *update {
        ChipUpdate::Psg(PsgUpdate::Tone { channel, .. })
        | ChipUpdate::Psg(PsgUpdate::Volume { channel, .. })
        | ChipUpdate::Scc(SccUpdate::Wave { channel, .. })
        | ChipUpdate::Scc(SccUpdate::Frequency { channel, .. })
        | ChipUpdate::Scc(SccUpdate::Volume { channel, .. })
        | ChipUpdate::Opll(OpllUpdate::FnumLow { channel, .. })
        | ChipUpdate::Opll(OpllUpdate::Control { channel, .. })
        | ChipUpdate::Opll(OpllUpdate::InstVol { channel, .. }) => Some(channel),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm_parser::{decode, DecodeOptions};

    fn create_vgm(commands: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 0x40];
        data[0..4].copy_from_slice(b"Vgm ");
        data[0x08..0x0C].copy_from_slice(&0x150u32.to_le_bytes());
        data.extend_from_slice(commands);
        data.push(0x66);
        data
    }

    fn build(commands: &[u8]) -> IrDocument {
        let stream = decode(&create_vgm(commands), &DecodeOptions::default()).unwrap();
        IrBuilder::from_stream(&stream).build(&stream)
    }

    #[test]
    fn test_psg_volume_rise_and_zero() {
        let ir = build(&[
            0xA0, 0x00, 0xFE, // period 254
            0xA0, 0x08, 0x0C, // level 12 -> open
            0x62, 0xA0, 0x08, 0x00, // level 0 -> close
        ]);
        assert_eq!(ir.events.len(), 3);
        assert_eq!(ir.notes.len(), 1);
        let note = &ir.notes[0];
        assert_eq!(note.chip, ChipId::Psg);
        assert_eq!(note.onset_cause, NoteCause::VolRise);
        assert_eq!(note.cause, NoteCause::VolZero);
        assert_eq!(note.off_samples - note.on_samples, 735);
        assert_eq!(note.volume, Some(12));
        let hz = note.pitch_hz.unwrap();
        assert!((hz - 1_789_772.0 / (16.0 * 254.0)).abs() < 1e-6);
    }

    #[test]
    fn test_psg_tone_mute_closes() {
        let ir = build(&[
            0xA0, 0x09, 0x0F, // ch1 level 15
            0x62, 0xA0, 0x07, 0xBA, // mute tone B
        ]);
        assert_eq!(ir.notes.len(), 1);
        assert_eq!(ir.notes[0].channel, 1);
        assert_eq!(ir.notes[0].cause, NoteCause::ToneMuted);
    }

    #[test]
    fn test_psg_freq_change_retriggers() {
        let ir = build(&[
            0xA0, 0x00, 0xC8, // period 200
            0xA0, 0x08, 0x0A, 0x62, // open
            0xA0, 0x00, 0x64, // period 100 (octave up)
            0x62, 0xA0, 0x00, 0x66, // period 102: small change
            0x62,
        ]);
        assert_eq!(ir.notes.len(), 2);
        assert_eq!(ir.notes[0].cause, NoteCause::FreqChange);
        assert_eq!(ir.notes[1].onset_cause, NoteCause::FreqChange);
        assert_eq!(ir.notes[1].cause, NoteCause::Eof);
        assert_eq!(ir.notes[1].off_samples, 735 * 3);
        let hz = ir.notes[1].pitch_hz.unwrap();
        assert!((hz - 1_789_772.0 / (16.0 * 102.0)).abs() < 1e-6);
    }

    #[test]
    fn test_scc_enable_edges() {
        let ir = build(&[
            0xD2, 0x02, 0x00, 0x0F, // ch0 volume 15, not enabled yet
            0xD2, 0x03, 0x00, 0x01, // enable ch0 -> open
            0x62, 0xD2, 0x03, 0x00, 0x00, // disable -> close
        ]);
        let scc: Vec<&Note> = ir.notes.iter().filter(|n| n.chip == ChipId::Scc).collect();
        assert_eq!(scc.len(), 1);
        assert_eq!(scc[0].onset_cause, NoteCause::EnableOn);
        assert_eq!(scc[0].cause, NoteCause::EnableOff);
        assert_eq!(ir.events[0].address, Some(0x988A));
    }

    #[test]
    fn test_scc_repeated_enable_does_not_overlap() {
        let ir = build(&[
            0xD2, 0x03, 0x00, 0x01, 0xD2, 0x02, 0x00, 0x08, // vol-rise open
            0x62, 0xD2, 0x03, 0x00, 0x01, // enable rewritten unchanged
            0x62,
        ]);
        assert_eq!(ir.notes.len(), 1);
        assert_eq!(ir.notes[0].onset_cause, NoteCause::VolRise);
        assert_eq!(ir.notes[0].cause, NoteCause::Eof);
    }

    #[test]
    fn test_opll_key_on_off() {
        let ir = build(&[
            0x51, 0x30, 0x32, // inst 3, vol 2
            0x51, 0x10, 0xAC, 0x51, 0x20, 0x19, // key on, block 4
            0x62, 0x51, 0x20, 0x09, // key off
            0x62,
        ]);
        assert_eq!(ir.notes.len(), 1);
        let note = &ir.notes[0];
        assert_eq!(note.chip, ChipId::Opll);
        assert_eq!(note.onset_cause, NoteCause::KeyOn);
        assert_eq!(note.cause, NoteCause::KeyOff);
        assert_eq!(note.volume, Some(13));
        assert_eq!(ir.opll_gates.len(), 1);
        assert_eq!(ir.opll_gates[0].off_samples, 735);
        assert_eq!(ir.opll_slices.len(), 1);
    }

    #[test]
    fn test_eof_closes_at_final_sample() {
        let ir = build(&[0x51, 0x20, 0x10, 0x62, 0x63]);
        assert_eq!(ir.notes.len(), 1);
        assert_eq!(ir.notes[0].cause, NoteCause::Eof);
        assert_eq!(ir.notes[0].off_samples, 735 + 882);
        assert_eq!(ir.header.total_samples, 735 + 882);
    }

    #[test]
    fn test_events_are_time_ordered() {
        let ir = build(&[
            0xA0, 0x08, 0x01, 0x62, 0x51, 0x20, 0x10, 0x70, 0xD2, 0x02, 0x01, 0x03, 0x50, 0x9F,
        ]);
        assert_eq!(ir.events.len(), 4);
        assert!(ir.events.windows(2).all(|w| w[0].samples <= w[1].samples));
        assert_eq!(ir.events[3].kind, EventKind::Unsupported);
    }
}
