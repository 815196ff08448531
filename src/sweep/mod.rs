//! Coarse-to-fine sweep over envelope and scoring nuisance parameters
//!
//! Each iteration lays an N-point grid over every active dimension, scores
//! every combination against the whole dataset (mean score of the sequences
//! with transitions), then shrinks each window around the best combination.
//! The best trial is the minimum of `(score, trial index)`, with indices in
//! lexicographic Cartesian order, so parallel and sequential runs agree.

pub mod grid;
pub mod report;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::envelope::{EgModel, EgTables, EnvelopeParams, ModelKind};
use crate::estimator::{
    estimate_dataset, estimate_gate, GateRow, GateSearch, GateStatus, ScoreWeights,
};
use crate::{Result, VgmGateError};

pub use grid::ParamRange;
pub use report::{read_best_json, BestParams};

/// A sweepable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepDim {
    /// Release base time
    BaseRelease,
    /// Curve shape exponent
    Shape,
    /// KSR time reduction per block
    KsrScale,
    /// Sustain floor amplitude
    SlFloor,
    /// Sustain mapping exponent
    SlCurve,
    /// Residual weight
    OverlapWeight,
    /// Sustain loss and gap weight
    GapWeight,
    /// dB offset
    DbOffset,
}

impl SweepDim {
    /// Every dimension in sweep order
    pub const ALL: [SweepDim; 8] = [
        SweepDim::BaseRelease,
        SweepDim::Shape,
        SweepDim::KsrScale,
        SweepDim::SlFloor,
        SweepDim::SlCurve,
        SweepDim::OverlapWeight,
        SweepDim::GapWeight,
        SweepDim::DbOffset,
    ];

    /// Column and key name
    pub fn name(&self) -> &'static str {
        match self {
            SweepDim::BaseRelease => "base_release",
            SweepDim::Shape => "shape",
            SweepDim::KsrScale => "ksr_scale",
            SweepDim::SlFloor => "sl_floor",
            SweepDim::SlCurve => "sl_curve",
            SweepDim::OverlapWeight => "overlap_weight",
            SweepDim::GapWeight => "gap_weight",
            SweepDim::DbOffset => "db_offset",
        }
    }

    /// Write `value` into the parameter this dimension controls
    pub fn apply(&self, value: f64, params: &mut EnvelopeParams, weights: &mut ScoreWeights) {
        match self {
            SweepDim::BaseRelease => params.base_release = value,
            SweepDim::Shape => params.shape = value,
            SweepDim::KsrScale => params.ksr_scale = value,
            SweepDim::SlFloor => params.sl_floor = value,
            SweepDim::SlCurve => params.sl_curve = value,
            SweepDim::OverlapWeight => weights.overlap = value,
            SweepDim::GapWeight => weights.gap = value,
            SweepDim::DbOffset => weights.db_offset = value,
        }
    }
}

impl fmt::Display for SweepDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Search windows; dimensions left unset keep their base value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepRanges {
    /// Release base time window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_release: Option<ParamRange>,
    /// Shape exponent window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<ParamRange>,
    /// KSR scale window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ksr_scale: Option<ParamRange>,
    /// Sustain floor window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_floor: Option<ParamRange>,
    /// Sustain curve window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_curve: Option<ParamRange>,
    /// Residual weight window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_weight: Option<ParamRange>,
    /// Gap weight window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_weight: Option<ParamRange>,
    /// dB offset window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_offset: Option<ParamRange>,
}

impl Default for SweepRanges {
    fn default() -> Self {
        SweepRanges {
            base_release: Some(ParamRange::new(0.2, 1.6)),
            shape: Some(ParamRange::new(0.5, 1.2)),
            ksr_scale: Some(ParamRange::new(0.0, 0.3)),
            sl_floor: Some(ParamRange::new(0.0, 0.2)),
            sl_curve: Some(ParamRange::new(0.6, 1.6)),
            overlap_weight: None,
            gap_weight: None,
            db_offset: None,
        }
    }
}

impl SweepRanges {
    /// No dimension swept
    pub fn none() -> Self {
        SweepRanges {
            base_release: None,
            shape: None,
            ksr_scale: None,
            sl_floor: None,
            sl_curve: None,
            overlap_weight: None,
            gap_weight: None,
            db_offset: None,
        }
    }

    /// Window of one dimension
    pub fn get(&self, dim: SweepDim) -> Option<ParamRange> {
        match dim {
            SweepDim::BaseRelease => self.base_release,
            SweepDim::Shape => self.shape,
            SweepDim::KsrScale => self.ksr_scale,
            SweepDim::SlFloor => self.sl_floor,
            SweepDim::SlCurve => self.sl_curve,
            SweepDim::OverlapWeight => self.overlap_weight,
            SweepDim::GapWeight => self.gap_weight,
            SweepDim::DbOffset => self.db_offset,
        }
    }

    /// Set or clear the window of one dimension
    pub fn set(&mut self, dim: SweepDim, range: Option<ParamRange>) {
        let slot = match dim {
            SweepDim::BaseRelease => &mut self.base_release,
            SweepDim::Shape => &mut self.shape,
            SweepDim::KsrScale => &mut self.ksr_scale,
            SweepDim::SlFloor => &mut self.sl_floor,
            SweepDim::SlCurve => &mut self.sl_curve,
            SweepDim::OverlapWeight => &mut self.overlap_weight,
            SweepDim::GapWeight => &mut self.gap_weight,
            SweepDim::DbOffset => &mut self.db_offset,
        };
        *slot = range;
    }

    /// Configured dimensions in sweep order
    pub fn active(&self) -> Vec<(SweepDim, ParamRange)> {
        SweepDim::ALL
            .iter()
            .filter_map(|&dim| self.get(dim).map(|r| (dim, r)))
            .collect()
    }
}

/// Sweep schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Number of refinement iterations
    pub iterations: usize,
    /// Grid points per dimension
    pub points: usize,
    /// Window shrink factor per iteration
    pub shrink: f64,
    /// Narrowest window after shrinking
    pub min_width: f64,
    /// Worker threads (0 = one per core)
    pub workers: usize,
    /// Per-dimension windows
    pub ranges: SweepRanges,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            iterations: 3,
            points: 3,
            shrink: 0.5,
            min_width: 1e-3,
            workers: 0,
            ranges: SweepRanges::default(),
        }
    }
}

impl SweepConfig {
    /// Check schedule and windows
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.points == 0 {
            return Err(VgmGateError::Config(format!(
                "sweep needs at least one iteration and one point (iterations {}, points {})",
                self.iterations, self.points
            )));
        }
        if !(self.shrink > 0.0 && self.shrink <= 1.0) {
            return Err(VgmGateError::Config(format!(
                "sweep shrink must lie in (0, 1], got {}",
                self.shrink
            )));
        }
        if !(self.min_width >= 0.0) {
            return Err(VgmGateError::Config(format!(
                "sweep min_width must be non-negative, got {}",
                self.min_width
            )));
        }
        for (dim, range) in self.ranges.active() {
            if !range.is_valid() {
                return Err(VgmGateError::Config(format!(
                    "invalid range for {dim}: [{}, {}]",
                    range.min, range.max
                )));
            }
            for value in [range.min, range.max] {
                let mut params = EnvelopeParams::default();
                let mut weights = ScoreWeights::default();
                dim.apply(value, &mut params, &mut weights);
                params.validate().map_err(|e| match e {
                    VgmGateError::Config(msg) => {
                        VgmGateError::Config(format!("sweep.ranges.{dim}: {msg}"))
                    }
                    other => other,
                })?;
            }
        }
        Ok(())
    }
}

/// Fixed inputs of a sweep
#[derive(Debug, Clone, Default)]
pub struct SweepBase {
    /// Model kind built for every trial
    pub model: ModelKind,
    /// Tables for the exact model
    pub tables: EgTables,
    /// Values of the dimensions not swept
    pub params: EnvelopeParams,
    /// Weights not swept
    pub weights: ScoreWeights,
    /// Gate grid
    pub search: GateSearch,
}

impl SweepBase {
    /// Parameters and weights of one combination
    pub fn resolve(&self, dims: &[SweepDim], values: &[f64]) -> (EnvelopeParams, ScoreWeights) {
        let mut params = self.params;
        let mut weights = self.weights;
        for (dim, &value) in dims.iter().zip(values) {
            dim.apply(value, &mut params, &mut weights);
        }
        (params, weights)
    }
}

/// One evaluated combination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    /// Index in lexicographic order within its iteration
    pub index: usize,
    /// Values aligned with the active dimensions
    pub values: Vec<f64>,
    /// Mean score over sequences with transitions
    pub score: f64,
    /// Sequences with transitions
    pub found: usize,
}

/// Best trial of one iteration and the windows it leads to
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
    /// 1-based iteration number
    pub iteration: usize,
    /// Windows searched
    pub windows: Vec<ParamRange>,
    /// Best trial
    pub best: Trial,
    /// Windows for the next iteration
    pub next_windows: Vec<ParamRange>,
}

/// Result of a sweep
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Swept dimensions in order
    pub dims: Vec<SweepDim>,
    /// Per-iteration summaries
    pub iterations: Vec<IterationSummary>,
    /// Best combination across all iterations
    pub best: BestParams,
    /// Per-sequence gates under the best combination
    pub gates: Vec<GateRow>,
}

impl SweepOutcome {
    /// Windows after the last shrink
    pub fn final_windows(&self) -> &[ParamRange] {
        self.iterations
            .last()
            .map(|it| it.next_windows.as_slice())
            .unwrap_or(&[])
    }
}

/// Mean score of the sequences with transitions, and their count
fn score_dataset(
    model: &EgModel,
    dataset: &Dataset,
    search: &GateSearch,
    weights: &ScoreWeights,
) -> (f64, usize) {
    let mut total = 0.0;
    let mut found = 0usize;
    for (_, seq) in dataset {
        let est = estimate_gate(model, &seq.patch, &seq.notes, search, weights);
        if est.status == GateStatus::Found {
            total += est.metrics.score;
            found += 1;
        }
    }
    if found == 0 {
        (0.0, 0)
    } else {
        (total / found as f64, found)
    }
}

fn evaluate(
    base: &SweepBase,
    dataset: &Dataset,
    dims: &[SweepDim],
    index: usize,
    values: &[f64],
) -> Trial {
    let (params, weights) = base.resolve(dims, values);
    let model = EgModel::new(base.model, params, &base.tables);
    let (score, found) = score_dataset(&model, dataset, &base.search, &weights);
    Trial {
        index,
        values: values.to_vec(),
        score,
        found,
    }
}

#[cfg(feature = "parallel")]
fn evaluate_all(
    base: &SweepBase,
    dataset: &Dataset,
    dims: &[SweepDim],
    combos: &[Vec<f64>],
    workers: usize,
) -> Result<Vec<Trial>> {
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| VgmGateError::Other(format!("failed to start sweep workers: {e}")))?;
    Ok(pool.install(|| {
        combos
            .par_iter()
            .enumerate()
            .map(|(i, values)| evaluate(base, dataset, dims, i, values))
            .collect()
    }))
}

#[cfg(not(feature = "parallel"))]
fn evaluate_all(
    base: &SweepBase,
    dataset: &Dataset,
    dims: &[SweepDim],
    combos: &[Vec<f64>],
    _workers: usize,
) -> Result<Vec<Trial>> {
    Ok(combos
        .iter()
        .enumerate()
        .map(|(i, values)| evaluate(base, dataset, dims, i, values))
        .collect())
}

/// Lowest score, earliest index on ties
fn best_trial(trials: &[Trial]) -> Option<&Trial> {
    trials
        .iter()
        .min_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)))
}

/// Run the sweep; with `out_dir` every report file is written there
pub fn run_sweep(
    dataset: &Dataset,
    base: &SweepBase,
    config: &SweepConfig,
    out_dir: Option<&Path>,
) -> Result<SweepOutcome> {
    config.validate()?;
    base.search.validate()?;
    base.params.validate()?;

    let active = config.ranges.active();
    let dims: Vec<SweepDim> = active.iter().map(|(d, _)| *d).collect();
    let bounds: Vec<ParamRange> = active.iter().map(|(_, r)| *r).collect();
    let mut windows = bounds.clone();
    info!(sequences = dataset.len(), notes = dataset.total_notes(), dims = dims.len(),
        points = config.points, iterations = config.iterations, model = %base.model,
        "starting sweep");

    let mut iterations = Vec::with_capacity(config.iterations);
    let mut overall: Option<(usize, Trial)> = None;

    for iteration in 1..=config.iterations {
        let axes: Vec<Vec<f64>> = windows.iter().map(|w| w.axis(config.points)).collect();
        let combos = grid::combinations(&axes);
        let trials = evaluate_all(base, dataset, &dims, &combos, config.workers)?;
        let best = best_trial(&trials)
            .cloned()
            .ok_or_else(|| VgmGateError::Other("sweep produced no trials".into()))?;

        let next_windows: Vec<ParamRange> = windows
            .iter()
            .zip(&bounds)
            .zip(&best.values)
            .map(|((w, b), &v)| w.shrink_around(v, config.shrink, config.min_width, b))
            .collect();

        info!(iteration, trials = trials.len(), score = best.score, trial = best.index,
            "sweep iteration done");
        for (dim, w) in dims.iter().zip(&next_windows) {
            debug!(iteration, dim = %dim, min = w.min, max = w.max, "next window");
        }

        if let Some(dir) = out_dir {
            report::write_trials_csv(
                &dir.join(format!("iter_{iteration}_trials.csv")),
                &dims,
                &trials,
            )?;
        }

        if overall.as_ref().map_or(true, |(_, t)| best.score < t.score) {
            overall = Some((iteration, best.clone()));
        }
        iterations.push(IterationSummary {
            iteration,
            windows: windows.clone(),
            best,
            next_windows: next_windows.clone(),
        });
        windows = next_windows;
    }

    let (best_iteration, best_trial) =
        overall.ok_or_else(|| VgmGateError::Other("sweep ran no iterations".into()))?;
    let (params, weights) = base.resolve(&dims, &best_trial.values);
    let best = BestParams::new(base.model, best_iteration, &dims, &best_trial, params, weights);

    let model = EgModel::new(base.model, params, &base.tables);
    let gates = estimate_dataset(&model, dataset, &base.search, &weights);

    if let Some(dir) = out_dir {
        report::write_summary_csv(&dir.join("summary.csv"), &dims, &iterations)?;
        report::write_best_json(&dir.join("best_params.json"), &best)?;
        crate::estimator::write_gates_csv(&dir.join("gates.csv"), &gates)?;
        info!(dir = %dir.display(), "wrote sweep reports");
    }

    Ok(SweepOutcome {
        dims,
        iterations,
        best,
        gates,
    })
}
