//! YM2413 key-on gates and parameter slices
//!
//! A gate spans one key-on rising edge to the following falling edge. While a
//! gate is open it is cut into slices whenever the channel's F-number/block
//! or instrument/volume actually change.

use serde::Serialize;

use crate::chips::opll::{OpllChannel, OpllUpdate, OPLL_CHANNELS};
use crate::chips::Edge;

/// What changed at the start of a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SliceKind {
    /// Frequency/block (also the first slice of a gate)
    #[serde(rename = "f")]
    Frequency,
    /// Instrument only
    #[serde(rename = "i")]
    Instrument,
    /// Volume only
    #[serde(rename = "v")]
    Volume,
    /// Instrument and volume together
    #[serde(rename = "iv")]
    Both,
}

impl SliceKind {
    /// CSV label
    pub fn label(&self) -> &'static str {
        match self {
            SliceKind::Frequency => "f",
            SliceKind::Instrument => "i",
            SliceKind::Volume => "v",
            SliceKind::Both => "iv",
        }
    }
}

/// One key-on gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpllGate {
    /// Channel 0-8
    pub channel: u8,
    /// 0-based index among this channel's gates
    pub index: usize,
    /// Key-on sample
    pub on_samples: u64,
    /// Key-off sample (stream end if never released)
    pub off_samples: u64,
    /// F-number at key-on
    pub fnum0: u16,
    /// Block at key-on
    pub block0: u8,
    /// Instrument at key-on
    pub inst0: u8,
    /// Volume attenuation at key-on
    pub vol0: u8,
}

/// A constant-parameter stretch inside a gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateSlice {
    /// Channel 0-8
    pub channel: u8,
    /// Index of the owning gate on this channel
    pub gate_index: usize,
    /// What changed at the slice start
    pub kind: SliceKind,
    /// First sample
    pub start_samples: u64,
    /// End sample (exclusive)
    pub end_samples: u64,
    /// F-number
    pub fnum: u16,
    /// Block
    pub block: u8,
    /// Instrument
    pub instrument: u8,
    /// Volume attenuation
    pub volume: u8,
}

#[derive(Debug, Clone, Copy)]
struct OpenSlice {
    start: u64,
    kind: SliceKind,
    state: OpllChannel,
}

#[derive(Debug, Clone, Copy)]
struct OpenGate {
    gate: usize,
    slice: OpenSlice,
}

/// Builds gates and slices from OPLL updates
#[derive(Debug, Clone, Default)]
pub struct OpllSlicer {
    gate_counts: [usize; OPLL_CHANNELS],
    open: [Option<OpenGate>; OPLL_CHANNELS],
    gates: Vec<OpllGate>,
    slices: Vec<GateSlice>,
}

impl OpllSlicer {
    /// Empty slicer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one update together with the channel snapshot taken after it
    pub fn observe(&mut self, samples: u64, update: &OpllUpdate, state: &OpllChannel) {
        match *update {
            OpllUpdate::Control {
                channel, key_edge, ..
            } => match key_edge {
                Edge::Rising => self.open_gate(samples, channel, state),
                Edge::Falling => self.close_gate(samples, channel),
                Edge::None => self.check_pitch(samples, channel, state),
            },
            OpllUpdate::FnumLow { channel, .. } => self.check_pitch(samples, channel, state),
            OpllUpdate::InstVol { channel, .. } => {
                let Some(open) = self.open[usize::from(channel)] else {
                    return;
                };
                let prev = open.slice.state;
                let kind = match (
                    prev.instrument != state.instrument,
                    prev.volume != state.volume,
                ) {
                    (true, true) => SliceKind::Both,
                    (true, false) => SliceKind::Instrument,
                    (false, true) => SliceKind::Volume,
                    (false, false) => return,
                };
                self.cut(samples, channel, kind, state);
            }
            _ => {}
        }
    }

    fn open_gate(&mut self, samples: u64, channel: u8, state: &OpllChannel) {
        let ch = usize::from(channel);
        self.close_gate(samples, channel);
        let index = self.gate_counts[ch];
        self.gate_counts[ch] += 1;
        self.gates.push(OpllGate {
            channel,
            index,
            on_samples: samples,
            off_samples: samples,
            fnum0: state.fnum,
            block0: state.block,
            inst0: state.instrument,
            vol0: state.volume,
        });
        self.open[ch] = Some(OpenGate {
            gate: self.gates.len() - 1,
            slice: OpenSlice {
                start: samples,
                kind: SliceKind::Frequency,
                state: *state,
            },
        });
    }

    fn close_gate(&mut self, samples: u64, channel: u8) {
        let Some(open) = self.open[usize::from(channel)].take() else {
            return;
        };
        self.push_slice(channel, &open, samples);
        self.gates[open.gate].off_samples = samples;
    }

    fn check_pitch(&mut self, samples: u64, channel: u8, state: &OpllChannel) {
        let Some(open) = self.open[usize::from(channel)] else {
            return;
        };
        let prev = open.slice.state;
        if prev.fnum != state.fnum || prev.block != state.block {
            self.cut(samples, channel, SliceKind::Frequency, state);
        }
    }

    fn cut(&mut self, samples: u64, channel: u8, kind: SliceKind, state: &OpllChannel) {
        let ch = usize::from(channel);
        let Some(open) = self.open[ch] else {
            return;
        };
        self.push_slice(channel, &open, samples);
        self.open[ch] = Some(OpenGate {
            gate: open.gate,
            slice: OpenSlice {
                start: samples,
                kind,
                state: *state,
            },
        });
    }

    fn push_slice(&mut self, channel: u8, open: &OpenGate, end: u64) {
        let s = open.slice.state;
        self.slices.push(GateSlice {
            channel,
            gate_index: self.gates[open.gate].index,
            kind: open.slice.kind,
            start_samples: open.slice.start,
            end_samples: end,
            fnum: s.fnum,
            block: s.block,
            instrument: s.instrument,
            volume: s.volume,
        });
    }

    /// Close anything still open at `end_samples` and return gates and slices
    pub fn finish(mut self, end_samples: u64) -> (Vec<OpllGate>, Vec<GateSlice>) {
        for channel in 0..OPLL_CHANNELS as u8 {
            self.close_gate(end_samples, channel);
        }
        (self.gates, self.slices)
    }
}
