//! Envelope generator models
//!
//! Two interchangeable carrier envelope models share one contract:
//! [`ParametricModel`] maps rate codes to times with a closed-form curve,
//! [`ExactModel`] looks them up in per-rate tables. Both feed the same
//! piecewise curve in [`curve`], so the estimator and sweep never need to
//! know which one is active.

pub mod curve;
pub mod exact;
pub mod parametric;
pub mod patches;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::estimator::{estimate_gate, GateEstimate, GateSearch, ScoreWeights};
use crate::{Result, VgmGateError};

pub use exact::{EgTables, ExactModel};
pub use parametric::ParametricModel;
pub use patches::{rom_patch, user_patch, ROM_PATCHES};

/// Highest rate/level code
pub const MAX_CODE: u8 = 15;

/// Carrier operator parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchParams {
    /// Attack rate 0-15
    pub ar: u8,
    /// Decay rate 0-15
    pub dr: u8,
    /// Sustain level 0-15 (0 = loudest)
    pub sl: u8,
    /// Release rate 0-15
    pub rr: u8,
    /// Key scale rate enabled
    #[serde(default)]
    pub ksr: bool,
}

impl PatchParams {
    /// True when every code is within 0-15
    pub fn is_valid(&self) -> bool {
        [self.ar, self.dr, self.sl, self.rr]
            .iter()
            .all(|&c| c <= MAX_CODE)
    }
}

impl Default for PatchParams {
    fn default() -> Self {
        PatchParams {
            ar: 15,
            dr: 4,
            sl: 4,
            rr: 7,
            ksr: false,
        }
    }
}

/// One note of a sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteContext {
    /// Raw F-number
    pub fnum: u16,
    /// Block (octave) 0-7
    #[serde(rename = "blk")]
    pub block: u8,
    /// Onset in seconds
    pub t_on: f64,
    /// Seconds to the next onset
    pub ioi: f64,
}

impl NoteContext {
    /// Key-off time for a gate fraction (clamped to [0, 1])
    pub fn key_off(&self, gate: f64) -> f64 {
        self.t_on + gate.clamp(0.0, 1.0) * self.ioi
    }
}

/// Durations of the attack, decay and release phases in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTimes {
    /// Attack duration
    pub attack: f64,
    /// Decay duration
    pub decay: f64,
    /// Release duration
    pub release: f64,
}

/// Nuisance parameters shared by both models
///
/// The exact model only reads `shape`, `sl_floor` and `sl_curve`; its phase
/// times come from tables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeParams {
    /// Attack base time in seconds at rate 8
    pub base_attack: f64,
    /// Decay base time in seconds at rate 8
    pub base_decay: f64,
    /// Release base time in seconds at rate 8
    pub base_release: f64,
    /// Curve shape exponent (0 = linear)
    pub shape: f64,
    /// Time reduction per block when KSR is on
    pub ksr_scale: f64,
    /// Sustain amplitude at the quietest level
    pub sl_floor: f64,
    /// Sustain mapping exponent
    pub sl_curve: f64,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        EnvelopeParams {
            base_attack: 0.5,
            base_decay: 1.0,
            base_release: 0.8,
            shape: 0.85,
            ksr_scale: 0.15,
            sl_floor: 0.05,
            sl_curve: 1.0,
        }
    }
}

impl EnvelopeParams {
    /// Reject values that make phase times or sustain amplitudes non-finite
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("base_attack", self.base_attack, self.base_attack >= 0.0),
            ("base_decay", self.base_decay, self.base_decay >= 0.0),
            ("base_release", self.base_release, self.base_release >= 0.0),
            ("shape", self.shape, self.shape >= 0.0),
            ("ksr_scale", self.ksr_scale, self.ksr_scale >= 0.0),
            ("sl_floor", self.sl_floor, (0.0..=1.0).contains(&self.sl_floor)),
            ("sl_curve", self.sl_curve, self.sl_curve > 0.0),
        ];
        for (name, value, ok) in checks {
            if !value.is_finite() || !ok {
                return Err(VgmGateError::Config(format!(
                    "envelope parameter {name} out of range: {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Which model to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Closed-form rate mapping
    #[default]
    Parametric,
    /// Table-driven rate mapping
    Exact,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Parametric => write!(f, "parametric"),
            ModelKind::Exact => write!(f, "exact"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parametric" | "param" => Ok(ModelKind::Parametric),
            "exact" | "table" => Ok(ModelKind::Exact),
            other => Err(format!("unknown envelope model '{other}'")),
        }
    }
}

/// Common contract of the envelope models
pub trait EnvelopeModel: Send + Sync {
    /// Attack/decay/release durations for a patch played at a note's pitch
    fn phase_times(&self, patch: &PatchParams, note: &NoteContext) -> PhaseTimes;

    /// Sustain amplitude for a sustain level code
    fn sustain_amp(&self, sl: u8) -> f64;

    /// Curve shape exponent
    fn shape(&self) -> f64;

    /// Amplitude in [0, 1] at `t` when the note is released after `gate` of its IOI
    fn residual_at(&self, patch: &PatchParams, note: &NoteContext, gate: f64, t: f64) -> f64 {
        let times = self.phase_times(patch, note);
        curve::amplitude_at(
            t,
            note.t_on,
            note.key_off(gate),
            &times,
            self.sustain_amp(patch.sl),
            self.shape(),
        )
    }

    /// Grid-search the gate for one note sequence
    fn choose_gate_grid(
        &self,
        patch: &PatchParams,
        notes: &[NoteContext],
        search: &GateSearch,
        weights: &ScoreWeights,
    ) -> GateEstimate {
        estimate_gate(self, patch, notes, search, weights)
    }
}

/// Runtime-selected envelope model
#[derive(Debug, Clone, PartialEq)]
pub enum EgModel {
    /// Closed-form model
    Parametric(ParametricModel),
    /// Table-driven model
    Exact(ExactModel),
}

impl EgModel {
    /// Build a model of `kind`; `tables` is only used by the exact model
    pub fn new(kind: ModelKind, params: EnvelopeParams, tables: &EgTables) -> Self {
        match kind {
            ModelKind::Parametric => EgModel::Parametric(ParametricModel::new(params)),
            ModelKind::Exact => EgModel::Exact(ExactModel::new(tables.clone(), params)),
        }
    }

    /// Model kind
    pub fn kind(&self) -> ModelKind {
        match self {
            EgModel::Parametric(_) => ModelKind::Parametric,
            EgModel::Exact(_) => ModelKind::Exact,
        }
    }

    /// Nuisance parameters in use
    pub fn params(&self) -> &EnvelopeParams {
        match self {
            EgModel::Parametric(m) => m.params(),
            EgModel::Exact(m) => m.params(),
        }
    }
}

impl Default for EgModel {
    fn default() -> Self {
        EgModel::Parametric(ParametricModel::default())
    }
}

impl EnvelopeModel for EgModel {
    fn phase_times(&self, patch: &PatchParams, note: &NoteContext) -> PhaseTimes {
        match self {
            EgModel::Parametric(m) => m.phase_times(patch, note),
            EgModel::Exact(m) => m.phase_times(patch, note),
        }
    }

    fn sustain_amp(&self, sl: u8) -> f64 {
        match self {
            EgModel::Parametric(m) => m.sustain_amp(sl),
            EgModel::Exact(m) => m.sustain_amp(sl),
        }
    }

    fn shape(&self) -> f64 {
        match self {
            EgModel::Parametric(m) => m.shape(),
            EgModel::Exact(m) => m.shape(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> NoteContext {
        NoteContext {
            fnum: 0xAC,
            block: 4,
            t_on: 1.0,
            ioi: 0.5,
        }
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("exact".parse::<ModelKind>(), Ok(ModelKind::Exact));
        assert_eq!("Parametric".parse::<ModelKind>(), Ok(ModelKind::Parametric));
        assert!("ymfm".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::Exact.to_string(), "exact");
    }

    #[test]
    fn test_patch_validity() {
        assert!(PatchParams::default().is_valid());
        let bad = PatchParams {
            sl: 16,
            ..PatchParams::default()
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_params_validate() {
        assert!(EnvelopeParams::default().validate().is_ok());
        let flat = EnvelopeParams {
            shape: 0.0,
            ksr_scale: 0.0,
            sl_floor: 1.0,
            ..EnvelopeParams::default()
        };
        assert!(flat.validate().is_ok());

        for bad in [
            EnvelopeParams {
                sl_curve: -0.5,
                ..EnvelopeParams::default()
            },
            EnvelopeParams {
                sl_curve: 0.0,
                ..EnvelopeParams::default()
            },
            EnvelopeParams {
                base_release: -1.0,
                ..EnvelopeParams::default()
            },
            EnvelopeParams {
                base_attack: f64::NAN,
                ..EnvelopeParams::default()
            },
            EnvelopeParams {
                shape: -0.1,
                ..EnvelopeParams::default()
            },
            EnvelopeParams {
                sl_floor: 1.5,
                ..EnvelopeParams::default()
            },
        ] {
            let err = bad.validate().unwrap_err();
            assert!(matches!(err, VgmGateError::Config(_)), "{bad:?}");
        }
    }

    #[test]
    fn test_both_models_share_contract() {
        let tables = EgTables::default();
        let patch = PatchParams::default();
        for kind in [ModelKind::Parametric, ModelKind::Exact] {
            let model = EgModel::new(kind, EnvelopeParams::default(), &tables);
            assert_eq!(model.kind(), kind);
            assert_eq!(model.residual_at(&patch, &note(), 0.8, 1.0), 0.0);
            assert_eq!(model.residual_at(&patch, &note(), 0.8, 0.5), 0.0);
            for i in 1..200 {
                let t = 1.0 + f64::from(i) * 0.01;
                let a = model.residual_at(&patch, &note(), 0.8, t);
                assert!((0.0..=1.0).contains(&a), "{kind} at {t}: {a}");
            }
        }
    }

    #[test]
    fn test_key_off_clamps_gate() {
        let n = note();
        assert_eq!(n.key_off(1.5), 1.5);
        assert_eq!(n.key_off(-0.2), 1.0);
        assert_eq!(n.key_off(0.5), 1.25);
    }
}
