use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{FlagValue, MeasurementMode, Protocol, SharedMemory};

/// perf_analyzer's own default for `--measurement-request-count`.
pub const DEFAULT_MEASUREMENT_REQUEST_COUNT: u64 = 50;

/// Arguments for one perf_analyzer invocation.
///
/// Recognised flags are typed fields. Anything else goes in `extra` and is
/// rendered after the named fields in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkParameters {
    pub model_name: String,
    pub model_version: u32,
    pub batch_size: u32,
    pub concurrency: u32,
    pub threads: u32,
    pub max_threads: u32,
    pub url: String,
    pub protocol: Protocol,
    pub input_data: String,
    /// Measurement window in milliseconds.
    pub measurement_interval: u64,
    pub measurement_mode: Option<MeasurementMode>,
    pub measurement_request_count: u64,
    pub latency_report_file: Option<PathBuf>,
    pub verbose: bool,
    pub shapes: Vec<String>,
    pub shared_memory: Option<SharedMemory>,
    pub extra: BTreeMap<String, FlagValue>,
}

impl BenchmarkParameters {
    pub fn new(model_name: &str, batch_size: u32, url: &str, protocol: Protocol) -> Self {
        BenchmarkParameters {
            model_name: model_name.to_string(),
            model_version: 1,
            batch_size,
            concurrency: 1,
            threads: 1,
            max_threads: 1,
            url: url.to_string(),
            protocol,
            input_data: "random".to_string(),
            measurement_interval: 10_000,
            measurement_mode: None,
            measurement_request_count: DEFAULT_MEASUREMENT_REQUEST_COUNT,
            latency_report_file: None,
            verbose: false,
            shapes: Vec::new(),
            shared_memory: None,
            extra: BTreeMap::new(),
        }
    }

    /// Set concurrency, threads and max-threads together.
    pub fn with_instances(mut self, instances: u32) -> Self {
        self.concurrency = instances;
        self.threads = instances;
        self.max_threads = instances;
        self
    }

    /// True when retries should raise the request count rather than the
    /// window. An unset mode counts.
    pub fn counts_requests(&self) -> bool {
        matches!(
            self.measurement_mode,
            None | Some(MeasurementMode::CountWindows)
        )
    }

    /// Render as perf_analyzer command-line arguments. Output order is fixed.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = ArgList::default();

        args.pair("model-name", &self.model_name);
        args.pair("model-version", self.model_version);
        args.pair("batch-size", self.batch_size);
        args.pair("concurrency", self.concurrency);
        args.pair("threads", self.threads);
        args.pair("max-threads", self.max_threads);
        args.pair("url", &self.url);
        args.pair("protocol", self.protocol);
        args.pair("input-data", &self.input_data);
        args.pair("measurement-interval", self.measurement_interval);

        if let Some(mode) = self.measurement_mode {
            args.pair("measurement-mode", mode.as_str());
        }
        if self.counts_requests() {
            args.pair("measurement-request-count", self.measurement_request_count);
        }

        if let Some(ref file) = self.latency_report_file {
            args.pair("latency-report-file", file.display());
        }

        args.switch("verbose", self.verbose);

        for shape in &self.shapes {
            args.pair("shape", shape);
        }

        if let Some(shm) = self.shared_memory {
            args.pair("shared-memory", shm.as_str());
        }

        for (key, value) in &self.extra {
            match value {
                FlagValue::Str(s) => args.pair(key, s),
                FlagValue::Int(n) => args.pair(key, n),
                FlagValue::Bool(b) => args.switch(key, *b),
            }
        }

        args.0
    }
}

#[derive(Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn pair(&mut self, key: &str, value: impl std::fmt::Display) {
        self.0.push(format!("--{}", key));
        self.0.push(value.to_string());
    }

    fn switch(&mut self, key: &str, on: bool) {
        if on {
            self.0.push(format!("--{}", key));
        }
    }
}
