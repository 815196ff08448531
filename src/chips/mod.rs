//! Chip State Trackers
//!
//! One tracker per supported chip family. Each owns the chip's register file
//! plus an array of per-channel records, applies every write before deriving
//! anything from it, and reports what changed as a typed update.

pub mod opll;
pub mod psg;
pub mod scc;

use serde::Serialize;

use crate::vgm_parser::{ChipWrite, VgmHeader};

pub use opll::{OpllChannel, OpllTracker, OpllUpdate};
pub use psg::{MixerFlags, PsgChannel, PsgTracker, PsgUpdate};
pub use scc::{SccChannel, SccRegister, SccTracker, SccUpdate};

/// Transition of a boolean channel flag between two writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    /// No change
    #[default]
    None,
    /// 0 -> 1
    Rising,
    /// 1 -> 0
    Falling,
}

impl Edge {
    /// Edge between a previous and current flag value
    pub fn between(previous: bool, current: bool) -> Self {
        match (previous, current) {
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
            _ => Edge::None,
        }
    }
}

/// Semantic result of one register write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChipUpdate {
    /// AY-3-8910 update
    Psg(PsgUpdate),
    /// K051649 update
    Scc(SccUpdate),
    /// YM2413 update
    Opll(OpllUpdate),
}

/// All trackers for one stream
#[derive(Debug, Clone)]
pub struct ChipTrackers {
    /// AY-3-8910 tracker
    pub psg: PsgTracker,
    /// K051649 tracker
    pub scc: SccTracker,
    /// YM2413 tracker
    pub opll: OpllTracker,
}

impl ChipTrackers {
    /// Trackers clocked from the header (defaults where the header has no clock)
    pub fn from_header(header: &VgmHeader) -> Self {
        ChipTrackers {
            psg: PsgTracker::new(header.ay8910_clock),
            scc: SccTracker::new(header.k051649_clock),
            opll: OpllTracker::new(header.ym2413_clock),
        }
    }

    /// Apply a write to the matching tracker. Writes to untracked chips yield `None`.
    pub fn apply(&mut self, write: &ChipWrite) -> Option<ChipUpdate> {
        match *write {
            ChipWrite::Psg { reg, value } => Some(ChipUpdate::Psg(self.psg.write(reg, value))),
            ChipWrite::Scc { port, reg, value } => {
                Some(ChipUpdate::Scc(self.scc.write(port, reg, value)))
            }
            ChipWrite::Opll { reg, value } => Some(ChipUpdate::Opll(self.opll.write(reg, value))),
            ChipWrite::Other { .. } => None,
        }
    }
}

impl Default for ChipTrackers {
    fn default() -> Self {
        ChipTrackers {
            psg: PsgTracker::new(0),
            scc: SccTracker::new(0),
            opll: OpllTracker::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_between() {
        assert_eq!(Edge::between(false, true), Edge::Rising);
        assert_eq!(Edge::between(true, false), Edge::Falling);
        assert_eq!(Edge::between(true, true), Edge::None);
        assert_eq!(Edge::between(false, false), Edge::None);
    }

    #[test]
    fn test_apply_routes_by_chip() {
        let mut trackers = ChipTrackers::default();
        let update = trackers.apply(&ChipWrite::Psg { reg: 8, value: 0x0F });
        assert!(matches!(update, Some(ChipUpdate::Psg(PsgUpdate::Volume { .. }))));
        let update = trackers.apply(&ChipWrite::Other {
            opcode: 0x50,
            payload: vec![0x9F],
        });
        assert!(update.is_none());
    }
}
