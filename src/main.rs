//! vgm-gate command-line front end
//!
//! - `decode`: VGM log to events, notes, timeline and OPLL gate tables
//! - `estimate`: per-(pattern, channel) gate CSV for a dataset
//! - `sweep`: coarse-to-fine nuisance parameter search
//! - `init-config`: write the default TOML configuration

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vgm_gate::dataset::{from_ir, Dataset, PatchSource};
use vgm_gate::envelope::{EgModel, EnvelopeParams, ModelKind};
use vgm_gate::estimator::{estimate_dataset, write_gates_csv, GateStatus, ScoreWeights};
use vgm_gate::ir::{
    write_events_csv, write_ir_json, write_notes_csv, write_opll_gates_csv,
    write_opll_slices_csv, IrBuilder,
};
use vgm_gate::sweep::{read_best_json, run_sweep, BestParams, SweepBase};
use vgm_gate::timeline::{quantize, write_timeline_csv};
use vgm_gate::vgm_parser::load_file;
use vgm_gate::AppConfig;

#[derive(Parser)]
#[command(name = "vgm-gate", version)]
#[command(about = "Decode VGM register logs and calibrate envelope gate fractions")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a VGM file into IR tables
    Decode {
        /// Input .vgm file
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Skip unknown opcodes instead of failing
        #[arg(long)]
        lenient: bool,

        /// Do not write timeline.csv
        #[arg(long)]
        no_timeline: bool,
    },

    /// Estimate the gate of every (pattern, channel) sequence
    Estimate {
        #[command(flatten)]
        data: DatasetArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Parameters and weights from a previous sweep's best_params.json
        #[arg(long)]
        best: Option<PathBuf>,

        /// Output gates CSV
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Coarse-to-fine sweep of envelope and scoring parameters
    Sweep {
        #[command(flatten)]
        data: DatasetArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Output directory for trials, summary, best_params.json and gates.csv
        #[arg(short, long)]
        out: PathBuf,

        /// Refinement iterations
        #[arg(long)]
        iterations: Option<usize>,

        /// Grid points per dimension
        #[arg(long)]
        points: Option<usize>,

        /// Worker threads (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Destination path
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Dataset sources; several may be combined
#[derive(Args)]
struct DatasetArgs {
    /// JSON manifest
    #[arg(long)]
    manifest: Vec<PathBuf>,

    /// Patches CSV manifest (with --notes)
    #[arg(long, requires = "notes")]
    patches: Option<PathBuf>,

    /// Notes CSV manifest (with --patches)
    #[arg(long, requires = "patches")]
    notes: Option<PathBuf>,

    /// YM2413 register timeline CSV
    #[arg(long)]
    timeline: Vec<PathBuf>,

    /// Per-channel durations CSV
    #[arg(long)]
    durations: Vec<PathBuf>,

    /// VGM file whose YM2413 gates become sequences
    #[arg(long)]
    vgm: Vec<PathBuf>,

    /// ROM instrument (1-15) for inputs without patch data
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=15))]
    inst: Option<u8>,

    /// Lenient decoding for --vgm inputs
    #[arg(long)]
    lenient: bool,
}

#[derive(Args)]
struct ModelArgs {
    /// Envelope model: parametric or exact
    #[arg(long)]
    model: Option<ModelKind>,

    /// EG tables JSON for the exact model
    #[arg(long)]
    eg_tables: Option<PathBuf>,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_model_args(config: &mut AppConfig, args: &ModelArgs) {
    if let Some(kind) = args.model {
        config.envelope.model = kind;
    }
    if let Some(path) = &args.eg_tables {
        config.envelope.tables = Some(path.clone());
    }
}

fn load_dataset(args: &DatasetArgs, config: &AppConfig) -> Result<Dataset> {
    let source = args.inst.map_or(PatchSource::Detect, PatchSource::Instrument);
    let mut dataset = Dataset::new();

    for path in &args.manifest {
        let part = Dataset::from_manifest(path)
            .with_context(|| format!("loading manifest {}", path.display()))?;
        dataset.extend(part);
    }
    if let (Some(patches), Some(notes)) = (&args.patches, &args.notes) {
        let part = Dataset::from_csv(patches, notes).with_context(|| {
            format!("loading {} and {}", patches.display(), notes.display())
        })?;
        dataset.extend(part);
    }
    for path in &args.timeline {
        let part = Dataset::from_timeline_csv(path, source)
            .with_context(|| format!("loading timeline {}", path.display()))?;
        dataset.extend(part);
    }
    for path in &args.durations {
        let part = Dataset::from_durations_csv(path, source)
            .with_context(|| format!("loading durations {}", path.display()))?;
        dataset.extend(part);
    }
    let mut options = config.decode.options();
    options.lenient |= args.lenient;
    for path in &args.vgm {
        let part = from_ir::load_vgm(path, &options, source)
            .with_context(|| format!("decoding {}", path.display()))?;
        dataset.extend(part);
    }

    if dataset.is_empty() {
        bail!(
            "no sequences loaded; pass --manifest, --patches/--notes, --timeline, \
             --durations or --vgm"
        );
    }
    info!(sequences = dataset.len(), notes = dataset.total_notes(), "dataset loaded");
    Ok(dataset)
}

fn decode(
    input: &Path,
    out: &Path,
    lenient: bool,
    no_timeline: bool,
    config: &AppConfig,
) -> Result<()> {
    let mut options = config.decode.options();
    options.lenient |= lenient;

    let stream =
        load_file(input, &options).with_context(|| format!("decoding {}", input.display()))?;
    info!(file = %input.display(), version = %stream.header.version_string(),
        commands = stream.commands.len(), samples = stream.total_samples,
        seconds = stream.duration_seconds(), "decoded");
    if stream.stats.unknown_opcodes > 0 {
        warn!(skipped = stream.stats.unknown_opcodes, "unknown opcodes skipped");
    }

    let ir = IrBuilder::from_stream(&stream).build(&stream);
    let sr = ir.header.sample_rate;
    write_events_csv(&out.join("events.csv"), &ir.events)?;
    write_notes_csv(&out.join("notes.csv"), &ir.notes)?;
    write_opll_gates_csv(&out.join("opll_gates.csv"), &ir.opll_gates, sr)?;
    write_opll_slices_csv(&out.join("opll_slices.csv"), &ir.opll_slices, sr)?;
    write_ir_json(&out.join("ir.json"), &ir)?;
    if !no_timeline {
        let timeline = quantize(&ir);
        info!(tick_samples = timeline.tick_samples, ticks_per_second = timeline.ticks_per_second,
            items = timeline.items.len(), "quantized");
        write_timeline_csv(&out.join("timeline.csv"), &timeline)?;
    }
    info!(events = ir.events.len(), notes = ir.notes.len(), gates = ir.opll_gates.len(),
        dir = %out.display(), "wrote IR tables");
    Ok(())
}

/// Model kind, parameters and weights from a sweep result; an explicit `--model` wins
fn swept_settings(
    best: &BestParams,
    model: Option<ModelKind>,
) -> Result<(ModelKind, EnvelopeParams, ScoreWeights)> {
    best.params.validate()?;
    let kind = match model {
        Some(kind) if kind != best.model => {
            warn!(swept = %best.model, using = %kind,
                "--model overrides the model the sweep was run with");
            kind
        }
        Some(kind) => kind,
        None => best.model,
    };
    Ok((kind, best.params, best.weights))
}

fn estimate(
    data: &DatasetArgs,
    model: Option<ModelKind>,
    best: Option<&Path>,
    out: &Path,
    config: &AppConfig,
) -> Result<()> {
    let dataset = load_dataset(data, config)?;
    let tables = config.envelope.load_tables().context("loading EG tables")?;

    let (kind, params, weights) = match best {
        Some(path) => {
            let best = read_best_json(path)
                .with_context(|| format!("reading {}", path.display()))?;
            info!(file = %path.display(), score = best.score, "using swept parameters");
            swept_settings(&best, model).with_context(|| format!("checking {}", path.display()))?
        }
        None => (config.envelope.model, config.envelope.params, config.weights),
    };
    let model = EgModel::new(kind, params, &tables);
    let rows = estimate_dataset(&model, &dataset, &config.gate, &weights);

    let degenerate = rows
        .iter()
        .filter(|r| r.status == GateStatus::NoTransitions)
        .count();
    if degenerate > 0 {
        warn!(sequences = degenerate, gate = config.gate.default_gate,
            "sequences without transitions use the default gate");
    }
    write_gates_csv(out, &rows).with_context(|| format!("writing {}", out.display()))?;
    info!(rows = rows.len(), model = %kind, file = %out.display(), "wrote gates");
    Ok(())
}

fn sweep(data: &DatasetArgs, out: &Path, config: &AppConfig) -> Result<()> {
    let dataset = load_dataset(data, config)?;
    let base = SweepBase {
        model: config.envelope.model,
        tables: config.envelope.load_tables().context("loading EG tables")?,
        params: config.envelope.params,
        weights: config.weights,
        search: config.gate,
    };
    let outcome = run_sweep(&dataset, &base, &config.sweep, Some(out))?;
    info!(score = outcome.best.score, iteration = outcome.best.iteration,
        trial = outcome.best.trial, "best combination");
    for (name, value) in &outcome.best.values {
        info!(param = %name, value = *value, "best value");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::InitConfig { path, force } = &cli.command {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        AppConfig::write_default(path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(file = %path.display(), "wrote default configuration");
        return Ok(());
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Decode {
            input,
            out,
            lenient,
            no_timeline,
        } => decode(input, out, *lenient, *no_timeline, &config),
        Command::Estimate {
            data,
            model,
            best,
            out,
        } => {
            apply_model_args(&mut config, model);
            estimate(data, model.model, best.as_deref(), out, &config)
        }
        Command::Sweep {
            data,
            model,
            out,
            iterations,
            points,
            workers,
        } => {
            apply_model_args(&mut config, model);
            if let Some(n) = iterations {
                config.sweep.iterations = *n;
            }
            if let Some(n) = points {
                config.sweep.points = *n;
            }
            if let Some(n) = workers {
                config.sweep.workers = *n;
            }
            config.validate()?;
            sweep(data, out, &config)
        }
        Command::InitConfig { .. } => Ok(()),
    }
}
