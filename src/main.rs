use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use perf_sweep::analyzer::PerfAnalyzer;
use perf_sweep::config::{self, FileConfig};
use perf_sweep::driver::{self, SweepOptions};
use perf_sweep::params::DEFAULT_MEASUREMENT_REQUEST_COUNT;
use perf_sweep::types::MeasurementMode;
use perf_sweep::warmup;

const DEFAULT_ANALYZER_BIN: &str = "perf_analyzer";
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// For models with variable-sized inputs pass `--input-shape` so perf_analyzer
/// knows what tensors to send, e.g. `--input-shape IMAGE:3,224,224`.
#[derive(Parser)]
#[command(
    name = "perf-sweep",
    version,
    about = "Run perf_analyzer across batch sizes and report throughput and latency"
)]
struct Cli {
    /// Name of the model to test
    #[arg(long)]
    model_name: String,

    /// Batch sizes to test, comma separated
    #[arg(long)]
    batch_sizes: String,

    /// Where to store the report (.csv or .json)
    #[arg(long)]
    result_path: PathBuf,

    /// Input data perf_analyzer sends
    #[arg(long)]
    input_data: Option<String>,

    /// Input shape as INPUT_NAME:<shape without batch axis>. Repeatable
    #[arg(long = "input-shape")]
    input_shapes: Vec<String>,

    /// URL of the inference server
    #[arg(long)]
    server_url: Option<String>,

    /// Number of server instances; sets concurrency and thread counts
    #[arg(long)]
    instances: Option<u32>,

    /// Time in ms perf_analyzer measures before judging stability
    #[arg(long)]
    measurement_window: Option<u64>,

    #[arg(long)]
    measurement_mode: Option<MeasurementMode>,

    /// Requests per window in count_windows mode
    #[arg(long)]
    measurement_request_count: Option<u64>,

    /// Use CUDA shared memory to talk to the server
    #[arg(long)]
    shared_memory: bool,

    /// Seconds before a single perf_analyzer run is killed
    #[arg(long)]
    timeout: Option<u64>,

    /// perf_analyzer binary [env: PERF_ANALYZER_BIN]
    #[arg(long)]
    analyzer_bin: Option<PathBuf>,

    /// Directory for per-batch latency reports
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Capture perf_analyzer output silently instead of echoing it
    #[arg(long)]
    no_stream: bool,

    #[arg(long)]
    skip_warmup: bool,

    /// Config file with defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// More logging (-vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// CLI flag, then `PERF_ANALYZER_BIN`, then config, then PATH lookup.
fn analyzer_bin(cli: &Cli, file: &FileConfig) -> PathBuf {
    if let Some(ref bin) = cli.analyzer_bin {
        return bin.clone();
    }
    if let Ok(bin) = std::env::var("PERF_ANALYZER_BIN")
        && !bin.is_empty()
    {
        return PathBuf::from(bin);
    }
    file.analyzer_bin
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ANALYZER_BIN))
}

fn sweep_options(cli: &Cli, file: &FileConfig) -> Result<SweepOptions> {
    let batch_sizes = driver::parse_batch_sizes(&cli.batch_sizes)?;
    let mut options = SweepOptions::new(&cli.model_name, batch_sizes);

    if let Some(url) = cli.server_url.clone().or_else(|| file.server_url.clone()) {
        options.server_url = url;
    }
    if let Some(data) = cli.input_data.clone().or_else(|| file.input_data.clone()) {
        options.input_data = data;
    }
    if let Some(dir) = cli.scratch_dir.clone().or_else(|| file.scratch_dir.clone()) {
        options.scratch_dir = dir;
    }
    options.instances = cli.instances.or(file.instances).unwrap_or(1);
    options.measurement_window = cli
        .measurement_window
        .or(file.measurement_window)
        .unwrap_or(10_000);
    options.measurement_mode = cli.measurement_mode.or(file.measurement_mode);
    options.measurement_request_count = cli
        .measurement_request_count
        .or(file.measurement_request_count)
        .unwrap_or(DEFAULT_MEASUREMENT_REQUEST_COUNT);
    options.input_shapes = cli.input_shapes.clone();
    options.shared_memory = cli.shared_memory;

    if options.instances == 0 {
        anyhow::bail!("--instances must be at least 1");
    }

    Ok(options)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let file = config::load_config(cli.config.as_deref())?;
    let options = sweep_options(&cli, &file)?;

    let timeout = Duration::from_secs(
        cli.timeout
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
    );
    let stream = !cli.no_stream && file.stream_output.unwrap_or(true);

    let mut analyzer = PerfAnalyzer::new(analyzer_bin(&cli, &file), timeout, stream);

    if !cli.skip_warmup {
        warmup::warmup(&mut analyzer, &options)?;
    }

    driver::run_offline_performance(&mut analyzer, &options, &cli.result_path)?;

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
