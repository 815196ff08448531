//! Intermediate representation of a decoded log
//!
//! Two streams come out of one forward pass over the decoded commands:
//! raw [`Event`]s (one per register write, never mutated afterwards) and
//! inferred [`Note`]s (onset/offset pairs from the per-channel gate state
//! machine). YM2413 channels additionally yield key-on gates split into
//! parameter slices.

pub mod builder;
pub mod export;
pub mod note_gate;
pub mod opll_slices;

use serde::Serialize;

use crate::chips::ChipUpdate;
use crate::vgm_parser::{ChipId, VgmHeader};

pub use builder::{IrBuilder, FREQ_CHANGE_THRESHOLD};
pub use export::{
    write_events_csv, write_ir_json, write_notes_csv, write_opll_gates_csv,
    write_opll_slices_csv,
};
pub use note_gate::{GateState, NoteGate};
pub use opll_slices::{GateSlice, OpllGate, OpllSlicer, SliceKind};

/// Event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Register write
    #[serde(rename = "reg-write")]
    RegWrite,
    /// SCC wavetable byte
    #[serde(rename = "wtb-write")]
    WaveWrite,
    /// Write to a chip without a tracker
    #[serde(rename = "unsupported")]
    Unsupported,
}

impl EventKind {
    /// CSV label
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::RegWrite => "reg-write",
            EventKind::WaveWrite => "wtb-write",
            EventKind::Unsupported => "unsupported",
        }
    }
}

/// Decoded extras attached to an Event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetail {
    /// Tracker output for the write
    Chip(ChipUpdate),
    /// Untracked chip command
    Raw {
        /// Opcode byte
        opcode: u8,
        /// Payload bytes
        payload: Vec<u8>,
    },
}

/// One register write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Seconds from stream start
    pub time_s: f64,
    /// Absolute sample position
    pub samples: u64,
    /// Chip family
    pub chip: ChipId,
    /// Channel, when the register belongs to one
    pub channel: Option<u8>,
    /// Classification
    pub kind: EventKind,
    /// Register or memory-mapped address
    pub address: Option<u32>,
    /// Written value
    pub value: Option<u8>,
    /// Derived quantities
    pub detail: EventDetail,
}

/// Why a note started or ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteCause {
    /// Key-on rising edge
    KeyOn,
    /// Key-on falling edge
    KeyOff,
    /// Volume rose from zero on an enabled channel
    VolRise,
    /// Volume fell to zero
    VolZero,
    /// PSG mixer disabled the channel's tone
    ToneMuted,
    /// Enable bit set while volume is non-zero
    EnableOn,
    /// Enable bit cleared
    EnableOff,
    /// Pitch jumped past the retrigger threshold
    FreqChange,
    /// A new onset arrived while the note was still open
    Overlap,
    /// Stream ended with the note open
    Eof,
}

impl NoteCause {
    /// CSV label
    pub fn label(&self) -> &'static str {
        match self {
            NoteCause::KeyOn => "key-on",
            NoteCause::KeyOff => "key-off",
            NoteCause::VolRise => "vol-rise",
            NoteCause::VolZero => "vol-zero",
            NoteCause::ToneMuted => "tone-muted",
            NoteCause::EnableOn => "enable-on",
            NoteCause::EnableOff => "enable-off",
            NoteCause::FreqChange => "freq-change",
            NoteCause::Overlap => "overlap",
            NoteCause::Eof => "eof",
        }
    }
}

/// An inferred note
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    /// Chip family
    pub chip: ChipId,
    /// Channel
    pub channel: u8,
    /// Onset in seconds
    pub t_on: f64,
    /// Offset in seconds (>= `t_on`)
    pub t_off: f64,
    /// Onset sample position
    pub on_samples: u64,
    /// Offset sample position
    pub off_samples: u64,
    /// Pitch at onset (or last in-place retune)
    pub pitch_hz: Option<f64>,
    /// Loudness at onset, 0-15
    pub volume: Option<u8>,
    /// What closed the note
    pub cause: NoteCause,
    /// What opened the note
    pub onset_cause: NoteCause,
}

impl Note {
    /// Note length in seconds
    pub fn duration_s(&self) -> f64 {
        (self.t_off - self.t_on).max(0.0)
    }
}

/// Header summary carried into the IR document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IrHeader {
    /// VGM version string
    pub version: String,
    /// Sample rate used for timestamps
    pub sample_rate: u32,
    /// Decoded sample count
    pub total_samples: u64,
    /// Header-declared sample count
    pub declared_samples: u32,
    /// Playback rate field
    pub rate: u32,
    /// AY8910 clock
    pub ay8910_clock: u32,
    /// K051649 clock
    pub k051649_clock: u32,
    /// YM2413 clock
    pub ym2413_clock: u32,
}

impl IrHeader {
    /// Build from the VGM header and decode results
    pub fn new(header: &VgmHeader, sample_rate: u32, total_samples: u64) -> Self {
        IrHeader {
            version: header.version_string(),
            sample_rate,
            total_samples,
            declared_samples: header.total_samples,
            rate: header.rate,
            ay8910_clock: header.ay8910_clock,
            k051649_clock: header.k051649_clock,
            ym2413_clock: header.ym2413_clock,
        }
    }
}

/// Everything produced from one log
#[derive(Debug, Clone, Serialize)]
pub struct IrDocument {
    /// Header summary
    pub header: IrHeader,
    /// Raw events in stream order
    pub events: Vec<Event>,
    /// Closed notes in close order
    pub notes: Vec<Note>,
    /// YM2413 key-on gates
    pub opll_gates: Vec<OpllGate>,
    /// YM2413 gate slices
    pub opll_slices: Vec<GateSlice>,
}

impl IrDocument {
    /// Notes of one chip/channel ordered by onset
    pub fn channel_notes(&self, chip: ChipId, channel: u8) -> Vec<&Note> {
        let mut notes: Vec<&Note> = self
            .notes
            .iter()
            .filter(|n| n.chip == chip && n.channel == channel)
            .collect();
        notes.sort_by_key(|n| n.on_samples);
        notes
    }
}
