//! Per-channel note state machine
//!
//! States are CLOSED and OPEN. A start while OPEN first force-closes the
//! current note with cause `overlap`, so a channel never holds two open notes.

use crate::vgm_parser::{samples_to_seconds, ChipId};

use super::{Note, NoteCause};

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No note sounding
    Closed,
    /// A note is sounding
    Open,
}

#[derive(Debug, Clone, Copy)]
struct OpenNote {
    on_samples: u64,
    pitch_hz: Option<f64>,
    volume: Option<u8>,
    cause: NoteCause,
}

/// Note gate for one chip channel
#[derive(Debug, Clone)]
pub struct NoteGate {
    chip: ChipId,
    channel: u8,
    sample_rate: u32,
    open: Option<OpenNote>,
}

impl NoteGate {
    /// Closed gate
    pub fn new(chip: ChipId, channel: u8, sample_rate: u32) -> Self {
        NoteGate {
            chip,
            channel,
            sample_rate,
            open: None,
        }
    }

    /// Current state
    pub fn state(&self) -> GateState {
        if self.open.is_some() {
            GateState::Open
        } else {
            GateState::Closed
        }
    }

    /// Pitch of the open note
    pub fn pitch_hz(&self) -> Option<f64> {
        self.open.and_then(|n| n.pitch_hz)
    }

    /// Open a note. Returns the note force-closed by an overlap, if any.
    pub fn start(
        &mut self,
        samples: u64,
        pitch_hz: Option<f64>,
        volume: Option<u8>,
        cause: NoteCause,
    ) -> Option<Note> {
        let overlapped = self.stop(samples, NoteCause::Overlap);
        self.open = Some(OpenNote {
            on_samples: samples,
            pitch_hz,
            volume,
            cause,
        });
        overlapped
    }

    /// Close the open note, if any
    pub fn stop(&mut self, samples: u64, cause: NoteCause) -> Option<Note> {
        let open = self.open.take()?;
        let off_samples = samples.max(open.on_samples);
        Some(Note {
            chip: self.chip,
            channel: self.channel,
            t_on: samples_to_seconds(open.on_samples, self.sample_rate),
            t_off: samples_to_seconds(off_samples, self.sample_rate),
            on_samples: open.on_samples,
            off_samples,
            pitch_hz: open.pitch_hz,
            volume: open.volume,
            cause,
            onset_cause: open.cause,
        })
    }

    /// Apply a pitch change to the open note.
    ///
    /// A relative change of at least `threshold` closes the note and opens a
    /// new one at the same instant (`freq-change`) when `retrigger` is set;
    /// smaller changes update the pitch in place.
    pub fn retune(
        &mut self,
        samples: u64,
        hz: f64,
        threshold: f64,
        retrigger: bool,
    ) -> Option<Note> {
        let open = self.open.as_mut()?;
        let Some(current) = open.pitch_hz.filter(|p| *p > 0.0) else {
            open.pitch_hz = Some(hz);
            return None;
        };
        if hz <= 0.0 {
            return None;
        }
        let delta = (hz - current).abs() / current;
        if delta < threshold {
            open.pitch_hz = Some(hz);
            return None;
        }
        if !retrigger {
            return None;
        }
        let volume = open.volume;
        let closed = self.stop(samples, NoteCause::FreqChange);
        self.open = Some(OpenNote {
            on_samples: samples,
            pitch_hz: Some(hz),
            volume,
            cause: NoteCause::FreqChange,
        });
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> NoteGate {
        NoteGate::new(ChipId::Psg, 0, 44_100)
    }

    #[test]
    fn test_start_stop() {
        let mut g = gate();
        assert_eq!(g.state(), GateState::Closed);
        assert!(g.start(100, Some(440.0), Some(12), NoteCause::VolRise).is_none());
        assert_eq!(g.state(), GateState::Open);
        let note = g.stop(44_200, NoteCause::VolZero).unwrap();
        assert_eq!(note.on_samples, 100);
        assert_eq!(note.off_samples, 44_200);
        assert_eq!(note.cause, NoteCause::VolZero);
        assert_eq!(note.onset_cause, NoteCause::VolRise);
        assert!((note.duration_s() - 1.0).abs() < 1e-12);
        assert_eq!(g.state(), GateState::Closed);
    }

    #[test]
    fn test_stop_when_closed_is_noop() {
        let mut g = gate();
        assert!(g.stop(10, NoteCause::VolZero).is_none());
    }

    #[test]
    fn test_overlap_force_closes() {
        let mut g = gate();
        g.start(0, None, Some(5), NoteCause::EnableOn);
        let closed = g.start(300, None, Some(7), NoteCause::VolRise).unwrap();
        assert_eq!(closed.cause, NoteCause::Overlap);
        assert_eq!(closed.off_samples, 300);
        let next = g.stop(600, NoteCause::Eof).unwrap();
        assert_eq!(next.on_samples, 300);
        assert_eq!(next.volume, Some(7));
        assert!(closed.off_samples <= next.on_samples);
    }

    #[test]
    fn test_retune_small_change_updates_in_place() {
        let mut g = gate();
        g.start(0, Some(440.0), Some(10), NoteCause::VolRise);
        assert!(g.retune(50, 460.0, 0.2, true).is_none());
        assert_eq!(g.pitch_hz(), Some(460.0));
    }

    #[test]
    fn test_retune_large_change_retriggers() {
        let mut g = gate();
        g.start(0, Some(440.0), Some(10), NoteCause::VolRise);
        let closed = g.retune(50, 880.0, 0.2, true).unwrap();
        assert_eq!(closed.cause, NoteCause::FreqChange);
        assert_eq!(closed.pitch_hz, Some(440.0));
        assert_eq!(g.pitch_hz(), Some(880.0));
        let next = g.stop(100, NoteCause::VolZero).unwrap();
        assert_eq!(next.onset_cause, NoteCause::FreqChange);
        assert_eq!(next.on_samples, 50);
        assert_eq!(next.volume, Some(10));
    }

    #[test]
    fn test_retune_without_retrigger_keeps_pitch() {
        let mut g = gate();
        g.start(0, Some(440.0), Some(10), NoteCause::KeyOn);
        assert!(g.retune(50, 880.0, 0.2, false).is_none());
        assert_eq!(g.pitch_hz(), Some(440.0));
    }
}
