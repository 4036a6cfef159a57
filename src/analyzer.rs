use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{PerfError, Result};
use crate::params::BenchmarkParameters;
use crate::process::{Executor, ProcessExecutor};
use crate::types::AttemptStatus;

/// Upper bound on invocations for a single `run`.
pub const MAX_ATTEMPTS: usize = 10;
/// Added to the request count when a count window was unstable.
pub const COUNT_INTERVAL_DELTA: u64 = 50;
/// Added to the measurement window (ms) when a time window was unstable.
pub const TIME_INTERVAL_DELTA: u64 = 2000;

/// Messages perf_analyzer prints when it could not get a stable measurement.
const UNSTABLE_MEASUREMENT_MARKERS: [&str; 2] = [
    "Failed to obtain stable measurement",
    "Please use a larger time window",
];

/// True when the tool failed only because its measurement never stabilised.
pub fn is_unstable_measurement(output: &str) -> bool {
    UNSTABLE_MEASUREMENT_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
}

/// Runs perf_analyzer, widening its measurement budget whenever it reports an
/// unstable measurement.
pub struct PerfAnalyzer<E = ProcessExecutor> {
    executor: E,
    bin_path: PathBuf,
    timeout: Duration,
    stream_output: bool,
    output: Option<String>,
}

impl PerfAnalyzer<ProcessExecutor> {
    pub fn new(bin_path: impl Into<PathBuf>, timeout: Duration, stream_output: bool) -> Self {
        PerfAnalyzer::with_executor(ProcessExecutor, bin_path, timeout, stream_output)
    }
}

impl<E: Executor> PerfAnalyzer<E> {
    pub fn with_executor(
        executor: E,
        bin_path: impl Into<PathBuf>,
        timeout: Duration,
        stream_output: bool,
    ) -> Self {
        PerfAnalyzer {
            executor,
            bin_path: bin_path.into(),
            timeout,
            stream_output,
            output: None,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn set_stream_output(&mut self, stream_output: bool) {
        self.stream_output = stream_output;
    }

    pub fn stream_output(&self) -> bool {
        self.stream_output
    }

    /// Run until perf_analyzer succeeds, fails for a reason other than an
    /// unstable measurement, or `MAX_ATTEMPTS` is reached.
    ///
    /// `params` is updated in place, so after an adapted run it holds the
    /// budget that finally worked.
    pub fn run(&mut self, params: &mut BenchmarkParameters) -> Result<String> {
        self.output = None;

        for attempt_no in 1..=MAX_ATTEMPTS {
            let command = self.render(params);
            debug!(command = %command.join(" "), "perf_analyzer command");
            debug!(timeout_secs = self.timeout.as_secs(), "perf_analyzer command timeout");

            let attempt = self
                .executor
                .execute(&command, self.timeout, self.stream_output)?;

            match attempt.status {
                AttemptStatus::Success => {
                    self.output = Some(attempt.output.clone());
                    return Ok(attempt.output);
                }
                AttemptStatus::TimedOut => {
                    return Err(PerfError::Timeout {
                        command: attempt.command_line(),
                        timeout_secs: self.timeout.as_secs(),
                        output: attempt.output,
                    });
                }
                AttemptStatus::Failed(code) if is_unstable_measurement(&attempt.output) => {
                    warn!(
                        attempt = attempt_no,
                        max_attempts = MAX_ATTEMPTS,
                        exit_code = ?code,
                        "perf_analyzer could not obtain a stable measurement"
                    );
                    widen_measurement(params);
                }
                AttemptStatus::Failed(code) => {
                    return Err(PerfError::ToolFailed {
                        command: attempt.command_line(),
                        exit_code: code,
                        output: attempt.output,
                    });
                }
            }
        }

        Err(PerfError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Output of the last successful `run`.
    pub fn output(&self) -> Result<&str> {
        self.output.as_deref().ok_or(PerfError::NoOutput)
    }

    fn render(&self, params: &BenchmarkParameters) -> Vec<String> {
        let mut command = vec![self.bin_path.to_string_lossy().into_owned()];
        command.extend(params.to_args());
        command
    }
}

fn widen_measurement(params: &mut BenchmarkParameters) {
    if params.counts_requests() {
        params.measurement_request_count += COUNT_INTERVAL_DELTA;
        debug!(
            "perf_analyzer's measurement request count is too small, increased to {}",
            params.measurement_request_count
        );
    } else {
        params.measurement_interval += TIME_INTERVAL_DELTA;
        debug!(
            "perf_analyzer's measurement window is too small, increased to {} ms",
            params.measurement_interval
        );
    }
}
