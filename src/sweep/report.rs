//! Sweep report files: per-iteration trials, summary and best parameters

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{IterationSummary, SweepDim, Trial};
use crate::envelope::{EnvelopeParams, ModelKind};
use crate::estimator::ScoreWeights;
use crate::{create_parent_dir, Result, VgmGateError};

/// Best combination of a sweep, as stored in `best_params.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestParams {
    /// Model kind the sweep used
    pub model: ModelKind,
    /// Iteration that produced the trial
    pub iteration: usize,
    /// Trial index within that iteration
    pub trial: usize,
    /// Mean score
    pub score: f64,
    /// Sequences with transitions
    pub found: usize,
    /// Swept values by dimension name
    pub values: BTreeMap<String, f64>,
    /// Full envelope parameters
    pub params: EnvelopeParams,
    /// Full scoring weights
    pub weights: ScoreWeights,
}

impl BestParams {
    /// Record a trial with the parameters it resolved to
    pub fn new(
        model: ModelKind,
        iteration: usize,
        dims: &[SweepDim],
        trial: &Trial,
        params: EnvelopeParams,
        weights: ScoreWeights,
    ) -> Self {
        BestParams {
            model,
            iteration,
            trial: trial.index,
            score: trial.score,
            found: trial.found,
            values: dims
                .iter()
                .zip(&trial.values)
                .map(|(d, v)| (d.name().to_string(), *v))
                .collect(),
            params,
            weights,
        }
    }
}

fn writer(path: &Path) -> Result<csv::Writer<File>> {
    create_parent_dir(path)?;
    Ok(csv::Writer::from_path(path)?)
}

/// Write `iter_<k>_trials.csv`: trial, one column per dimension, score, found
pub fn write_trials_csv(path: &Path, dims: &[SweepDim], trials: &[Trial]) -> Result<()> {
    let mut w = writer(path)?;
    let mut header = vec!["trial".to_string()];
    header.extend(dims.iter().map(|d| d.name().to_string()));
    header.extend(["score".to_string(), "found".to_string()]);
    w.write_record(&header)?;

    for trial in trials {
        let mut record = vec![trial.index.to_string()];
        record.extend(trial.values.iter().map(f64::to_string));
        record.push(trial.score.to_string());
        record.push(trial.found.to_string());
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// Write `summary.csv`: the best trial of every iteration and the next windows
pub fn write_summary_csv(
    path: &Path,
    dims: &[SweepDim],
    iterations: &[IterationSummary],
) -> Result<()> {
    let mut w = writer(path)?;
    let mut header = vec![
        "iteration".to_string(),
        "trial".to_string(),
        "score".to_string(),
        "found".to_string(),
    ];
    header.extend(dims.iter().map(|d| d.name().to_string()));
    for d in dims {
        header.push(format!("{}_next_min", d.name()));
        header.push(format!("{}_next_max", d.name()));
    }
    w.write_record(&header)?;

    for it in iterations {
        let mut record = vec![
            it.iteration.to_string(),
            it.best.index.to_string(),
            it.best.score.to_string(),
            it.best.found.to_string(),
        ];
        record.extend(it.best.values.iter().map(f64::to_string));
        for window in &it.next_windows {
            record.push(window.min.to_string());
            record.push(window.max.to_string());
        }
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// Write `best_params.json`
pub fn write_best_json(path: &Path, best: &BestParams) -> Result<()> {
    create_parent_dir(path)?;
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, best)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Read a `best_params.json` written by a previous sweep
pub fn read_best_json(path: &Path) -> Result<BestParams> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| VgmGateError::schema(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::ParamRange;

    fn trial(index: usize, values: Vec<f64>, score: f64) -> Trial {
        Trial {
            index,
            values,
            score,
            found: 2,
        }
    }

    #[test]
    fn test_summary_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let dims = [SweepDim::Shape];
        let it = IterationSummary {
            iteration: 1,
            windows: vec![ParamRange::new(0.5, 1.0)],
            best: trial(4, vec![0.75], -12.5),
            next_windows: vec![ParamRange::new(0.625, 0.875)],
        };
        write_summary_csv(&path, &dims, &[it]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("iteration,trial,score,found,shape,shape_next_min,shape_next_max")
        );
        assert_eq!(lines.next(), Some("1,4,-12.5,2,0.75,0.625,0.875"));
    }

    #[test]
    fn test_best_json_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/best_params.json");
        let dims = [SweepDim::BaseRelease, SweepDim::GapWeight];
        let mut params = EnvelopeParams::default();
        params.base_release = 0.4;
        let weights = ScoreWeights {
            gap: 0.3,
            ..ScoreWeights::default()
        };
        let best = BestParams::new(
            ModelKind::Exact,
            2,
            &dims,
            &trial(7, vec![0.4, 0.3], -30.0),
            params,
            weights,
        );
        write_best_json(&path, &best).unwrap();
        let loaded = read_best_json(&path).unwrap();
        assert_eq!(loaded, best);
        assert_eq!(loaded.values["gap_weight"], 0.3);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"model\": \"exact\""));
    }
}
