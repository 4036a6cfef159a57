use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info};

use crate::analyzer::PerfAnalyzer;
use crate::errors::{PerfError, Result};
use crate::metrics;
use crate::params::{BenchmarkParameters, DEFAULT_MEASUREMENT_REQUEST_COUNT};
use crate::process::Executor;
use crate::report;
use crate::server::parse_server_url;
use crate::types::{BatchMeasurement, MeasurementMode, Protocol, SharedMemory};

/// Everything a sweep needs besides the analyzer itself.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub model_name: String,
    pub batch_sizes: Vec<u32>,
    pub server_url: String,
    pub instances: u32,
    pub input_data: String,
    pub input_shapes: Vec<String>,
    /// Milliseconds.
    pub measurement_window: u64,
    pub measurement_mode: Option<MeasurementMode>,
    pub measurement_request_count: u64,
    pub shared_memory: bool,
    pub scratch_dir: PathBuf,
}

impl SweepOptions {
    pub fn new(model_name: &str, batch_sizes: Vec<u32>) -> Self {
        SweepOptions {
            model_name: model_name.to_string(),
            batch_sizes,
            server_url: "http://localhost:8000".to_string(),
            instances: 1,
            input_data: "random".to_string(),
            input_shapes: Vec::new(),
            measurement_window: 10_000,
            measurement_mode: None,
            measurement_request_count: DEFAULT_MEASUREMENT_REQUEST_COUNT,
            shared_memory: false,
            scratch_dir: PathBuf::from("."),
        }
    }

    /// Protocol and `host:port` for perf_analyzer's `--url`.
    pub fn endpoint(&self) -> Result<(Protocol, String)> {
        let (protocol, host, port) = parse_server_url(&self.server_url)?;
        Ok((protocol, format!("{}:{}", host, port)))
    }

    /// Parameters for one batch size, without a latency report file.
    pub fn parameters(&self, batch_size: u32, protocol: Protocol, url: &str) -> BenchmarkParameters {
        let mut params = BenchmarkParameters::new(&self.model_name, batch_size, url, protocol)
            .with_instances(self.instances);
        params.input_data = self.input_data.clone();
        params.measurement_interval = self.measurement_window;
        params.measurement_mode = self.measurement_mode;
        params.measurement_request_count = self.measurement_request_count;
        params.verbose = true;
        params.shapes = self.input_shapes.clone();
        if self.shared_memory {
            params.shared_memory = Some(SharedMemory::Cuda);
        }
        params
    }
}

/// Parse `"1, 2,4"` into batch sizes. Order and duplicates are kept.
pub fn parse_batch_sizes(input: &str) -> Result<Vec<u32>> {
    let invalid = || PerfError::InvalidBatchSizes {
        input: input.to_string(),
    };
    input
        .split(',')
        .map(|s| match s.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(invalid()),
        })
        .collect()
}

/// Latency report path perf_analyzer writes for `batch_size`.
pub fn scratch_file(dir: &Path, batch_size: u32) -> PathBuf {
    dir.join(format!("perf_sweep_partial_{}.csv", batch_size))
}

/// Benchmark every batch size in order and collect one measurement each.
///
/// The first batch size that cannot be measured aborts the sweep.
pub fn run_sweep<E: Executor>(
    analyzer: &mut PerfAnalyzer<E>,
    options: &SweepOptions,
) -> Result<Vec<BatchMeasurement>> {
    info!("====== Static batching analysis start ======");

    let (protocol, url) = options.endpoint()?;
    let mut results = Vec::with_capacity(options.batch_sizes.len());

    for &batch_size in &options.batch_sizes {
        info!(batch_size, "Running performance tests");
        let partial = scratch_file(&options.scratch_dir, batch_size);

        let mut params = options.parameters(batch_size, protocol, &url);
        params.latency_report_file = Some(partial.clone());

        if let Err(e) = analyzer.run(&mut params) {
            error!(batch_size, "perf_analyzer run failed, aborting the sweep");
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }

        let measurement = metrics::load_measurement(batch_size, &partial);
        let _ = std::fs::remove_file(&partial);
        let measurement = measurement
            .inspect_err(|_| error!(batch_size, "Latency report unusable, aborting the sweep"))?;

        info!(
            batch_size,
            avg_latency = measurement.avg_latency,
            "Batch size measured"
        );
        results.push(measurement);
    }

    Ok(results)
}

/// Sweep, then sort, save and print the report.
pub fn run_offline_performance<E: Executor>(
    analyzer: &mut PerfAnalyzer<E>,
    options: &SweepOptions,
    result_path: &Path,
) -> Result<Vec<BatchMeasurement>> {
    let mut results = run_sweep(analyzer, options)?;

    report::sort_results(&mut results);
    report::save_results(result_path, &results, Utc::now())?;
    report::show_results(&results);

    info!(
        "Performance results for static batching stored in: {}",
        result_path.display()
    );
    info!("====== Analysis done ======");
    Ok(results)
}
