//! TOML configuration
//!
//! Every section and field is optional; anything missing takes its default.
//! `vgm-gate init-config` writes the defaults as a starting point.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{create_parent_dir, Result, VgmGateError};

#[cfg(feature = "estimator")]
use crate::envelope::{EgTables, EnvelopeParams, ModelKind};
#[cfg(feature = "estimator")]
use crate::estimator::{GateSearch, ScoreWeights};
#[cfg(feature = "sweep")]
use crate::sweep::SweepConfig;

/// Decoder settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Skip unknown or truncated commands instead of failing
    #[serde(default)]
    pub lenient: bool,
    /// Output sample rate for seconds conversion
    #[serde(default = "DecodeConfig::default_sample_rate")]
    pub sample_rate: u32,
}

impl DecodeConfig {
    fn default_sample_rate() -> u32 {
        44_100
    }

    /// Decoder options for these settings
    #[cfg(feature = "decoder")]
    pub fn options(&self) -> crate::vgm_parser::DecodeOptions {
        crate::vgm_parser::DecodeOptions {
            lenient: self.lenient,
            sample_rate: self.sample_rate,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            lenient: false,
            sample_rate: Self::default_sample_rate(),
        }
    }
}

/// Envelope model selection
#[cfg(feature = "estimator")]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Model kind
    #[serde(default)]
    pub model: ModelKind,
    /// EG tables JSON for the exact model; built-in YM2413 timing when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<PathBuf>,
    /// Nuisance parameters
    #[serde(default)]
    pub params: EnvelopeParams,
}

#[cfg(feature = "estimator")]
impl EnvelopeConfig {
    /// Load the configured tables
    pub fn load_tables(&self) -> Result<EgTables> {
        match &self.tables {
            Some(path) => EgTables::load(path),
            None => Ok(EgTables::ym2413()),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Decoder
    #[serde(default)]
    pub decode: DecodeConfig,
    /// Gate grid and probe
    #[cfg(feature = "estimator")]
    #[serde(default)]
    pub gate: GateSearch,
    /// Scoring weights
    #[cfg(feature = "estimator")]
    #[serde(default)]
    pub weights: ScoreWeights,
    /// Envelope model
    #[cfg(feature = "estimator")]
    #[serde(default)]
    pub envelope: EnvelopeConfig,
    /// Sweep schedule and windows
    #[cfg(feature = "sweep")]
    #[serde(default)]
    pub sweep: SweepConfig,
}

const SECTION_NOTES: &[(&str, &str)] = &[
    ("[decode]", "# Strict decoding fails on unknown opcodes; lenient skips them"),
    ("[gate]", "# Gate candidates run from gate_min to gate_max in gate_step"),
    (
        "[weights]",
        "# score = (dB + db_offset) * overlap + (loss + gap penalty) * gap + linear * residual",
    ),
    (
        "[envelope]",
        "# model = \"parametric\" | \"exact\"; tables = \"eg_tables.json\" for custom timing",
    ),
    ("[sweep]", "# workers = 0 uses one thread per core"),
    ("[sweep.ranges", "# A window with min = max pins a value"),
];

impl AppConfig {
    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| VgmGateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|e| {
            VgmGateError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            VgmGateError::Config(msg) => VgmGateError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        if self.decode.sample_rate == 0 {
            return Err(VgmGateError::Config("decode.sample_rate must be positive".into()));
        }
        #[cfg(feature = "estimator")]
        {
            self.gate.validate()?;
            self.envelope.params.validate()?;
        }
        #[cfg(feature = "sweep")]
        self.sweep.validate()?;
        Ok(())
    }

    /// Defaults as TOML with a note above each section
    pub fn default_toml() -> Result<String> {
        let text = toml::to_string_pretty(&Self::default())
            .map_err(|e| VgmGateError::Config(e.to_string()))?;
        let mut out = String::from("# vgm-gate configuration; every key is optional\n\n");
        let mut noted = [false; SECTION_NOTES.len()];
        for line in text.lines() {
            let header = line.trim_start();
            if let Some(i) = SECTION_NOTES
                .iter()
                .position(|(section, _)| header.starts_with(section))
            {
                if !noted[i] {
                    noted[i] = true;
                    out.push_str(SECTION_NOTES[i].1);
                    out.push('\n');
                }
            }
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write the default configuration to `path`
    pub fn write_default(path: &Path) -> Result<()> {
        create_parent_dir(path)?;
        fs::write(path, Self::default_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_gives_defaults() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.decode.sample_rate, 44_100);
        assert!(!cfg.decode.lenient);
    }

    #[test]
    fn test_default_template_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/vgm-gate.toml");
        AppConfig::write_default(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# vgm-gate configuration"));
        assert!(text.contains("[decode]"));
        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[cfg(feature = "sweep")]
    #[test]
    fn test_partial_sections() {
        use crate::sweep::{ParamRange, SweepDim};

        let cfg = AppConfig::from_toml(
            r#"
            [decode]
            lenient = true

            [gate]
            gate_step = 0.02
            residual_threshold_db = -50.0

            [weights]
            gap = 0.5

            [envelope]
            model = "exact"

            [envelope.params]
            shape = 1.1

            [sweep]
            iterations = 4
            workers = 2

            [sweep.ranges.db_offset]
            min = 40.0
            max = 80.0
            "#,
        )
        .unwrap();
        assert!(cfg.decode.lenient);
        assert_eq!(cfg.decode.sample_rate, 44_100);
        assert_eq!(cfg.gate.gate_step, 0.02);
        assert_eq!(cfg.gate.gate_min, 0.5);
        assert_eq!(cfg.weights.gap, 0.5);
        assert_eq!(cfg.weights.db_offset, 60.0);
        assert_eq!(cfg.envelope.model, ModelKind::Exact);
        assert_eq!(cfg.envelope.params.shape, 1.1);
        assert_eq!(cfg.envelope.params.base_release, 0.8);
        assert_eq!(cfg.sweep.iterations, 4);
        assert_eq!(cfg.sweep.points, 3);
        assert_eq!(
            cfg.sweep.ranges.get(SweepDim::DbOffset),
            Some(ParamRange::new(40.0, 80.0))
        );
        assert!(cfg.sweep.ranges.get(SweepDim::Shape).is_some());
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = AppConfig::from_toml("[decode]\nsample_rate = 0\n").unwrap_err();
        assert!(matches!(err, VgmGateError::Config(_)));
        let err = AppConfig::from_toml("[decode\n").unwrap_err();
        assert!(matches!(err, VgmGateError::Config(_)));
        #[cfg(feature = "estimator")]
        {
            let err = AppConfig::from_toml("[gate]\ngate_max = 0.2\n").unwrap_err();
            assert!(err.to_string().contains("gate_max"));
        }
    }

    #[cfg(feature = "sweep")]
    #[test]
    fn test_envelope_params_and_windows_are_checked() {
        let err = AppConfig::from_toml("[envelope.params]\nsl_curve = -1.0\n").unwrap_err();
        assert!(matches!(err, VgmGateError::Config(_)));
        assert!(err.to_string().contains("sl_curve"));

        let err = AppConfig::from_toml("[envelope.params]\nbase_decay = -0.2\n").unwrap_err();
        assert!(err.to_string().contains("base_decay"));

        let err =
            AppConfig::from_toml("[sweep.ranges.sl_curve]\nmin = -0.5\nmax = 1.0\n").unwrap_err();
        assert!(matches!(err, VgmGateError::Config(_)));
        assert!(err.to_string().contains("sweep.ranges.sl_curve"));

        let err = AppConfig::from_toml("[sweep.ranges.shape]\nmin = -1.0\nmax = 0.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("shape"));

        let ok = AppConfig::from_toml("[sweep.ranges.db_offset]\nmin = -20.0\nmax = 80.0\n");
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unreadable_file_names_path() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/vgm-gate.toml"))).unwrap_err();
        assert!(matches!(err, VgmGateError::Config(_)));
        assert!(err.to_string().contains("/nonexistent/vgm-gate.toml"));
    }
}
