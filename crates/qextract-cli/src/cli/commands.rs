use super::CliError;
use super::helpers::*;
use anyhow::Context;
use qextract_core::config::{
    CorpusConfig, ReconstructionConfig, TrajectoryMode, load_config_file,
};
use qextract_core::corpus::CorpusAggregator;
use qextract_core::domain::StoreOrder;
use qextract_core::extract::extract_file;
use qextract_core::spectrum::summary::{time_range, trajectory_summary, write_trajectory_summary};
use qextract_core::spectrum::{
    ConvergenceOutcome, ErrorMetric, Normalization, ReconstructionRequest, SpectrumReconstructor,
};
use qextract_core::store::HierarchicalStore;
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
pub(super) struct ExtractArgs {
    /// Calculation output file
    file: PathBuf,

    /// Print single-line JSON
    #[arg(long)]
    compact: bool,
}

#[derive(clap::Args)]
pub(super) struct ConvertArgs {
    /// Directory tree holding the calculation outputs
    root: PathBuf,

    /// Store file to create or extend
    #[arg(long)]
    store: PathBuf,

    /// JSON corpus configuration; the flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// File-name glob of calculation outputs (default: *.out)
    #[arg(long)]
    pattern: Option<String>,

    /// Role of each directory level, e.g. TRAJ/TIME (default) or TIME/TRAJ
    #[arg(long)]
    layout: Option<String>,

    /// Nesting order written to the store
    #[arg(long, value_parser = parse_store_order)]
    store_order: Option<StoreOrder>,

    /// Directory with <trajectory>_pop.dat files (default: ROOT)
    #[arg(long)]
    population_dir: Option<PathBuf>,

    /// Decimals used in time labels
    #[arg(long)]
    time_precision: Option<usize>,
}

#[derive(clap::Args)]
pub(super) struct StoreQueryArgs {
    /// Store written by `convert`
    #[arg(long)]
    store: PathBuf,

    /// JSON reconstruction configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Nesting order of the store
    #[arg(long, value_parser = parse_store_order)]
    store_order: Option<StoreOrder>,

    /// Decimals used in time labels
    #[arg(long)]
    time_precision: Option<usize>,
}

#[derive(clap::Args)]
pub(super) struct ReconstructArgs {
    #[command(flatten)]
    query: StoreQueryArgs,

    #[arg(long)]
    wavelength_start: f64,

    #[arg(long)]
    wavelength_end: f64,

    #[arg(long, default_value_t = 100)]
    wavelength_points: usize,

    /// Time steps to evaluate (default: discovered from the store)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    times: Option<Vec<f64>>,

    /// Trajectories to include (default: discovered from the store)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    trajectories: Option<Vec<String>>,

    /// Keep only trajectories present at every time step
    #[arg(long)]
    strict: bool,

    /// Lorentzian width
    #[arg(long)]
    half_width: Option<f64>,

    /// Write the reduced map here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Report the number of trajectories needed to reach this error
    #[arg(long)]
    convergence: Option<f64>,

    #[arg(long, default_value = "frobenius")]
    norm: Normalization,

    #[arg(long, default_value = "frobenius_distance")]
    metric: ErrorMetric,
}

#[derive(clap::Args)]
pub(super) struct SummaryArgs {
    #[command(flatten)]
    query: StoreQueryArgs,

    #[arg(long)]
    trajectory: String,

    /// Tab-separated summary file
    #[arg(long)]
    output: PathBuf,

    #[arg(long, default_value_t = 0.0)]
    time_start: f64,

    /// Exclusive upper bound
    #[arg(long, default_value_t = 200.5)]
    time_end: f64,

    #[arg(long, default_value_t = 0.5)]
    time_step: f64,
}

pub(super) fn run_extract_command(args: ExtractArgs) -> Result<i32, CliError> {
    let result = extract_file(&args.file).map_err(CliError::compute)?;
    let rendered = if args.compact {
        serde_json::to_string(&result)
    } else {
        serde_json::to_string_pretty(&result)
    }
    .with_context(|| format!("failed to serialize result for '{}'", args.file.display()))?;

    println!("{rendered}");
    Ok(0)
}

pub(super) fn run_convert_command(args: ConvertArgs) -> Result<i32, CliError> {
    let mut config: CorpusConfig = match &args.config {
        Some(path) => load_config_file(path).map_err(CliError::compute)?,
        None => CorpusConfig::default(),
    };
    if let Some(pattern) = args.pattern {
        config.file_pattern = pattern;
    }
    if let Some(layout) = args.layout {
        config.layout = layout;
    }
    if let Some(store_order) = args.store_order {
        config.store_order = store_order;
    }
    if let Some(population_dir) = args.population_dir {
        config.population_dir = Some(population_dir);
    }
    if let Some(time_precision) = args.time_precision {
        config.time_precision = time_precision;
    }

    let aggregator = CorpusAggregator::new(&args.root, config).map_err(CliError::compute)?;
    let mut store = HierarchicalStore::open_or_create(&args.store).map_err(CliError::compute)?;
    let report = aggregator.convert(&mut store).map_err(CliError::compute)?;
    store.save(&args.store).map_err(CliError::compute)?;

    for skipped in &report.skipped {
        eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    println!("{}", report.summary_line());
    info!(store = %args.store.display(), datasets = report.datasets_written, "store written");
    Ok(0)
}

fn reconstruction_config(query: &StoreQueryArgs) -> Result<ReconstructionConfig, CliError> {
    let mut config: ReconstructionConfig = match &query.config {
        Some(path) => load_config_file(path).map_err(CliError::compute)?,
        None => ReconstructionConfig::default(),
    };
    if let Some(store_order) = query.store_order {
        config.store_order = store_order;
    }
    if let Some(time_precision) = query.time_precision {
        config.time_precision = time_precision;
    }
    Ok(config)
}

pub(super) fn run_reconstruct_command(args: ReconstructArgs) -> Result<i32, CliError> {
    let mut config = reconstruction_config(&args.query)?;
    if args.strict {
        config.trajectory_mode = TrajectoryMode::Strict;
    }
    if let Some(half_width) = args.half_width {
        config.half_width = half_width;
    }
    if args.wavelength_points == 0 {
        return Err(CliError::Usage(
            "--wavelength-points must be at least 1".to_string(),
        ));
    }

    let store = load_store(&args.query.store)?;
    let request = ReconstructionRequest {
        wavelengths: linspace(args.wavelength_start, args.wavelength_end, args.wavelength_points),
        times: args.times,
        trajectories: args.trajectories,
    };
    let absorption = SpectrumReconstructor::new(&store, config)
        .reconstruct(&request)
        .map_err(CliError::compute)?;

    let rendered = render_spectrum_map(&absorption);
    match &args.output {
        Some(path) => write_output_file(path, &rendered)?,
        None => print!("{rendered}"),
    }

    let diagnostics = absorption.diagnostics();
    if diagnostics.missing_nodes > 0 || diagnostics.missing_states > 0 {
        eprintln!(
            "missing store nodes: {}, missing pump states: {}",
            diagnostics.missing_nodes, diagnostics.missing_states
        );
    }

    if let Some(threshold) = args.convergence {
        match absorption.convergence(threshold, args.norm, args.metric) {
            ConvergenceOutcome::Converged {
                trajectories,
                error,
                ..
            } => eprintln!(
                "converged after {trajectories} trajectories ({} = {error:.6e})",
                args.metric
            ),
            ConvergenceOutcome::NotConverged {
                trajectories,
                last_error,
            } => eprintln!(
                "not converged within {trajectories} trajectories (last {} = {})",
                args.metric,
                last_error.map_or_else(|| "n/a".to_string(), |error| format!("{error:.6e}"))
            ),
        }
    }
    Ok(0)
}

pub(super) fn run_summary_command(args: SummaryArgs) -> Result<i32, CliError> {
    let config = reconstruction_config(&args.query)?;
    let store = load_store(&args.query.store)?;
    let times = time_range(args.time_start, args.time_end, args.time_step);
    if times.is_empty() {
        return Err(CliError::Usage(
            "time range is empty; check --time-start, --time-end and --time-step".to_string(),
        ));
    }

    let rows = trajectory_summary(&store, &args.trajectory, &times, &config);
    write_trajectory_summary(&args.output, &rows)
        .with_context(|| format!("failed to write summary '{}'", args.output.display()))?;
    info!(trajectory = %args.trajectory, rows = rows.len(), "summary written");
    Ok(0)
}
