//! Closed-form envelope model
//!
//! Every four rate steps halve the phase time around the base time at rate
//! 8. Rate 0 holds for [`HOLD_TIME_S`]. With KSR on, each block shortens all
//! three phases by `ksr_scale`, never below 30% of the unscaled time.

use super::{EnvelopeModel, EnvelopeParams, NoteContext, PatchParams, PhaseTimes, MAX_CODE};

/// Phase duration used for rate code 0
pub const HOLD_TIME_S: f64 = 10.0;

const MIN_TIME_S: f64 = 1e-4;
const MIN_KSR_FACTOR: f64 = 0.3;

/// Parametric carrier envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParametricModel {
    params: EnvelopeParams,
}

impl ParametricModel {
    /// Model with the given nuisance parameters
    pub fn new(params: EnvelopeParams) -> Self {
        ParametricModel { params }
    }

    /// Nuisance parameters
    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    /// Time multiplier for a block
    pub fn ksr_factor(&self, ksr: bool, block: u8) -> f64 {
        if !ksr {
            return 1.0;
        }
        let block = f64::from(block.min(7));
        (1.0 - self.params.ksr_scale * block).max(MIN_KSR_FACTOR)
    }

    /// Seconds for a rate code against a base time
    pub fn code_to_time(&self, code: u8, base: f64, ksr_factor: f64) -> f64 {
        if code == 0 {
            return HOLD_TIME_S;
        }
        let rel = f64::from(code.min(MAX_CODE)) - 8.0;
        (base * 0.5f64.powf(rel / 4.0) * ksr_factor).max(MIN_TIME_S)
    }
}

impl EnvelopeModel for ParametricModel {
    fn phase_times(&self, patch: &PatchParams, note: &NoteContext) -> PhaseTimes {
        let k = self.ksr_factor(patch.ksr, note.block);
        PhaseTimes {
            attack: self.code_to_time(patch.ar, self.params.base_attack, k),
            decay: self.code_to_time(patch.dr, self.params.base_decay, k),
            release: self.code_to_time(patch.rr, self.params.base_release, k),
        }
    }

    fn sustain_amp(&self, sl: u8) -> f64 {
        let floor = self.params.sl_floor.clamp(0.0, 1.0);
        let x = 1.0 - f64::from(sl.min(MAX_CODE)) / f64::from(MAX_CODE);
        floor + (1.0 - floor) * x.powf(self.params.sl_curve)
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
    fn test_code_to_time() {
        let m = ParametricModel::default();
        assert_eq!(m.code_to_time(0, 0.8, 1.0), HOLD_TIME_S);
        assert_relative_eq!(m.code_to_time(8, 0.8, 1.0), 0.8);
        assert_relative_eq!(m.code_to_time(12, 0.8, 1.0), 0.4);
        assert_relative_eq!(m.code_to_time(4, 0.8, 1.0), 1.6);
        assert_eq!(m.code_to_time(15, 1e-6, 1.0), MIN_TIME_S);
    }

    #[test]
    fn test_ksr_shortens_with_block() {
        let m = ParametricModel::default();
        assert_eq!(m.ksr_factor(false, 7), 1.0);
        assert_relative_eq!(m.ksr_factor(true, 2), 0.7, max_relative = 1e-12);
        assert_relative_eq!(m.ksr_factor(true, 7), MIN_KSR_FACTOR);
        let patch = PatchParams {
            ksr: true,
            ..PatchParams::default()
        };
        let low = NoteContext {
            fnum: 0,
            block: 1,
            t_on: 0.0,
            ioi: 1.0,
        };
        let high = NoteContext { block: 5, ..low };
        let (a, b) = (m.phase_times(&patch, &low), m.phase_times(&patch, &high));
        assert!(b.release < a.release);
        assert!(b.decay < a.decay);
    }

    #[test]
    fn test_sustain_mapping() {
        let m = ParametricModel::default();
        assert_relative_eq!(m.sustain_amp(0), 1.0);
        assert_relative_eq!(m.sustain_amp(15), 0.05);
        let mut last = f64::INFINITY;
        for sl in 0..=15 {
            let a = m.sustain_amp(sl);
            assert!(a <= last);
            last = a;
        }
    }
}
