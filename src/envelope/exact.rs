//! Table-driven envelope model
//!
//! Phase times come from 16-entry per-rate tables in milliseconds. With KSR
//! on, the block's shift is added to any non-zero rate before the lookup and
//! the result is clamped to 15. Rate 0 never moves the envelope.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{EnvelopeModel, EnvelopeParams, NoteContext, PatchParams, PhaseTimes, MAX_CODE};
use crate::{Result, VgmGateError};

/// Hold time for rate 0 in milliseconds
pub const HOLD_TIME_MS: f64 = 10_000.0;

const ATTACK_RATE1_MS: f64 = 2826.24;
const DECAY_RATE1_MS: f64 = 39280.64;

/// Per-rate phase times in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgTimes {
    /// Attack time per rate
    pub attack: [f64; 16],
    /// Decay time per rate
    pub decay: [f64; 16],
    /// Release time per rate
    pub release: [f64; 16],
}

/// Key scale rate table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KsrTable {
    /// Rate shift added per block
    pub per_blk_shift: [u8; 8],
}

/// Envelope timing tables (`eg_times_ms` / `ksr` JSON layout)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgTables {
    /// Phase times
    pub eg_times_ms: EgTimes,
    /// KSR shifts
    pub ksr: KsrTable,
    /// Chip clock the tables were measured at
    #[serde(default = "EgTables::default_clock_hz")]
    pub clock_hz: u32,
}

impl EgTables {
    fn default_clock_hz() -> u32 {
        3_579_545
    }

    /// Built-in YM2413 timing at the NTSC clock
    pub fn ym2413() -> Self {
        let mut attack = [0.0; 16];
        let mut decay = [0.0; 16];
        attack[0] = HOLD_TIME_MS;
        decay[0] = HOLD_TIME_MS;
        for rate in 1..16 {
            let halvings = 2f64.powi(rate as i32 - 1);
            attack[rate] = if rate == 15 {
                0.0
            } else {
                ATTACK_RATE1_MS / halvings
            };
            decay[rate] = DECAY_RATE1_MS / halvings;
        }
        EgTables {
            eg_times_ms: EgTimes {
                attack,
                decay,
                release: decay,
            },
            ksr: KsrTable {
                per_blk_shift: [0, 0, 1, 1, 2, 2, 3, 3],
            },
            clock_hz: Self::default_clock_hz(),
        }
    }

    /// Parse tables from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let tables: EgTables = serde_json::from_str(text)?;
        tables.validate()?;
        Ok(tables)
    }

    /// Load tables from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| match e {
            VgmGateError::Json(err) => VgmGateError::schema(path, err.to_string()),
            other => other,
        })
    }

    fn validate(&self) -> Result<()> {
        let t = &self.eg_times_ms;
        let finite = t
            .attack
            .iter()
            .chain(&t.decay)
            .chain(&t.release)
            .all(|v| v.is_finite() && *v >= 0.0);
        if !finite {
            return Err(VgmGateError::Config(
                "EG tables must hold finite non-negative times".into(),
            ));
        }
        Ok(())
    }

    /// Rate after the KSR shift
    pub fn effective_rate(&self, rate: u8, block: u8, ksr: bool) -> u8 {
        let rate = rate.min(MAX_CODE);
        if !ksr || rate == 0 {
            return rate;
        }
        let shift = self
            .ksr
            .per_blk_shift
            .get(usize::from(block))
            .copied()
            .unwrap_or(0);
        rate.saturating_add(shift).min(MAX_CODE)
    }
}

impl Default for EgTables {
    fn default() -> Self {
        Self::ym2413()
    }
}

/// Table-driven carrier envelope
#[derive(Debug, Clone, PartialEq)]
pub struct ExactModel {
    tables: EgTables,
    params: EnvelopeParams,
}

impl ExactModel {
    /// Model over `tables`, taking shape and sustain mapping from `params`
    pub fn new(tables: EgTables, params: EnvelopeParams) -> Self {
        ExactModel { tables, params }
    }

    /// Timing tables
    pub fn tables(&self) -> &EgTables {
        &self.tables
    }

    /// Nuisance parameters
    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    fn lookup(&self, table: &[f64; 16], rate: u8, block: u8, ksr: bool) -> f64 {
        if rate == 0 {
            return HOLD_TIME_MS / 1000.0;
        }
        let effective = self.tables.effective_rate(rate, block, ksr);
        table[usize::from(effective)] / 1000.0
    }
}

impl Default for ExactModel {
    fn default() -> Self {
        ExactModel::new(EgTables::default(), EnvelopeParams::default())
    }
}

impl EnvelopeModel for ExactModel {
    fn phase_times(&self, patch: &PatchParams, note: &NoteContext) -> PhaseTimes {
        let t = &self.tables.eg_times_ms;
        PhaseTimes {
            attack: self.lookup(&t.attack, patch.ar, note.block, patch.ksr),
            decay: self.lookup(&t.decay, patch.dr, note.block, patch.ksr),
            release: self.lookup(&t.release, patch.rr, note.block, patch.ksr),
        }
    }

    /// 3 dB per sustain step, mapped between the floor and full scale
    fn sustain_amp(&self, sl: u8) -> f64 {
        let floor = self.params.sl_floor.clamp(0.0, 1.0);
        let linear = 10f64.powf(-3.0 * f64::from(sl.min(MAX_CODE)) / 20.0);
        floor + (1.0 - floor) * linear.powf(self.params.sl_curve)
    }

    fn shape(&self) -> f64 {
        self.params.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_builtin_tables() {
        let t = EgTables::ym2413();
        assert_eq!(t.eg_times_ms.attack[15], 0.0);
        assert_relative_eq!(t.eg_times_ms.attack[1], 2826.24);
        assert_relative_eq!(t.eg_times_ms.attack[2], 1413.12);
        assert_relative_eq!(t.eg_times_ms.decay[3], 9820.16);
        assert_eq!(t.eg_times_ms.release, t.eg_times_ms.decay);
    }

    #[test]
    fn test_effective_rate() {
        let t = EgTables::ym2413();
        assert_eq!(t.effective_rate(7, 6, false), 7);
        assert_eq!(t.effective_rate(7, 6, true), 10);
        assert_eq!(t.effective_rate(14, 7, true), 15);
        assert_eq!(t.effective_rate(0, 7, true), 0);
        assert_eq!(t.effective_rate(5, 9, true), 5);
    }

    #[test]
    fn test_rate_zero_holds() {
        let m = ExactModel::default();
        let patch = PatchParams {
            ar: 15,
            dr: 0,
            sl: 0,
            rr: 0,
            ksr: true,
        };
        let note = NoteContext {
            fnum: 0,
            block: 7,
            t_on: 0.0,
            ioi: 1.0,
        };
        let times = m.phase_times(&patch, &note);
        assert_eq!(times.decay, 10.0);
        assert_eq!(times.release, 10.0);
    }

    #[test]
    fn test_sustain_steps_are_3db() {
        let m = ExactModel::new(
            EgTables::default(),
            EnvelopeParams {
                sl_floor: 0.0,
                ..EnvelopeParams::default()
            },
        );
        assert_relative_eq!(m.sustain_amp(0), 1.0);
        assert_relative_eq!(
            20.0 * m.sustain_amp(2).log10(),
            -6.0,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_tables_from_json() {
        let json = serde_json::to_string(&EgTables::ym2413()).unwrap();
        let parsed = EgTables::from_json(&json).unwrap();
        assert_eq!(parsed, EgTables::ym2413());
        assert!(EgTables::from_json(r#"{"eg_times_ms":{"attack":[1.0]}}"#).is_err());
    }

    #[test]
    fn test_load_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.json");
        std::fs::write(&path, r#"{"ksr":{"per_blk_shift":[0,0,0,0,0,0,0,0]}}"#).unwrap();
        let err = EgTables::load(&path).unwrap_err();
        assert!(matches!(err, VgmGateError::Schema { .. }));
        assert!(err.to_string().contains("tables.json"));
    }
}
