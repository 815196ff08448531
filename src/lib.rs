//! VGM register-log analysis and envelope gate calibration
//!
//! Reconstructs musical events from VGM logs of AY-3-8910 (PSG), K051649 (SCC)
//! and YM2413 (OPLL) register writes, and calibrates the key-on gate fraction
//! of note sequences against a simulated FM envelope generator.
//!
//! # Pipeline
//! - [`vgm_parser`] decodes the binary command stream into timestamped chip writes
//! - [`chips`] tracks per-channel register state and derives frequency/volume/key edges
//! - [`ir`] turns tracker output into raw Events, inferred Notes and OPLL gate slices
//! - [`timeline`] quantizes Events onto a shared tick grid
//! - [`envelope`] simulates carrier amplitude (parametric or table-driven)
//! - [`estimator`] grid-searches the gate fraction per (pattern, channel)
//! - [`sweep`] refines envelope nuisance parameters coarse-to-fine
//!
//! # Crate feature flags
//! - `decoder` (default): VGM decoding, chip trackers, IR builder, quantizer
//! - `estimator` (default): envelope models, gate estimator, dataset loaders
//! - `sweep` (default): coarse-to-fine parameter sweep
//! - `parallel` (default): rayon-backed sweep evaluation
//! - `cli` (default): the `vgm-gate` binary
//!
//! # Quick start
//! ```no_run
//! # #[cfg(feature = "decoder")]
//! # {
//! use vgm_gate::ir::IrBuilder;
//! use vgm_gate::vgm_parser::{decode, DecodeOptions};
//! let data = std::fs::read("song.vgm").unwrap();
//! let stream = decode(&data, &DecodeOptions::default()).unwrap();
//! let ir = IrBuilder::from_stream(&stream).build(&stream);
//! println!("{} events, {} notes", ir.events.len(), ir.notes.len());
//! # }
//! ```

#![warn(missing_docs)]

// Domain modules (feature-gated for modular use)
pub mod config; // TOML configuration

#[cfg(feature = "decoder")]
pub mod chips; // Chip State Trackers
#[cfg(feature = "decoder")]
pub mod ir; // Events, Notes and OPLL gate slices
#[cfg(feature = "decoder")]
pub mod timeline; // Tick quantizer
#[cfg(feature = "decoder")]
pub mod vgm_parser; // VGM Stream Decoding

#[cfg(feature = "estimator")]
pub mod dataset; // Note sequence loaders
#[cfg(feature = "estimator")]
pub mod envelope; // Envelope generator models
#[cfg(feature = "estimator")]
pub mod estimator; // Gate grid search
#[cfg(feature = "sweep")]
pub mod sweep; // Coarse-to-fine parameter sweep

#[cfg(feature = "decoder")]
pub use vgm_parser::DecodeError;

/// Error types for decoding, loading and calibration
#[derive(thiserror::Error, Debug)]
pub enum VgmGateError {
    /// Binary stream decoding failure
    #[cfg(feature = "decoder")]
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Required field or column missing from an input file
    #[error("Schema error in {file}: {detail}")]
    Schema {
        /// Offending input file
        file: String,
        /// What was missing
        detail: String,
    },

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON reading or writing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl VgmGateError {
    /// Build a schema error for a missing field or column.
    pub fn schema(file: impl AsRef<std::path::Path>, detail: impl Into<String>) -> Self {
        VgmGateError::Schema {
            file: file.as_ref().display().to_string(),
            detail: detail.into(),
        }
    }
}

impl From<String> for VgmGateError {
    /// Converts a String into `VgmGateError::Other`.
    ///
    /// Prefer the specific variants (`Schema`, `Config`) where the failure
    /// has a known category.
    fn from(msg: String) -> Self {
        VgmGateError::Other(msg)
    }
}

impl From<&str> for VgmGateError {
    fn from(msg: &str) -> Self {
        VgmGateError::Other(msg.to_string())
    }
}

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, VgmGateError>;

/// Create the parent directory of an output file if it does not exist yet.
pub(crate) fn create_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

// Public API exports
pub use config::AppConfig;

#[cfg(feature = "decoder")]
pub use ir::{Event, IrBuilder, IrDocument, Note};
#[cfg(feature = "decoder")]
pub use timeline::{quantize, Timeline};
#[cfg(feature = "decoder")]
pub use vgm_parser::{decode, DecodeOptions, DecodedStream, VgmHeader};

#[cfg(feature = "estimator")]
pub use dataset::{Dataset, SequenceKey};
#[cfg(feature = "estimator")]
pub use envelope::{EgModel, EnvelopeModel, NoteContext, PatchParams};
#[cfg(feature = "estimator")]
pub use estimator::{estimate_gate, GateEstimate, GateSearch, GateStatus, ScoreWeights};
#[cfg(feature = "sweep")]
pub use sweep::{run_sweep, SweepConfig, SweepOutcome};
