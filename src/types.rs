use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Latency breakdown columns perf_analyzer writes to its latency report.
pub const LATENCY_COMPONENTS: [&str; 8] = [
    "Client Send",
    "Network+Server Send/Recv",
    "Server Queue",
    "Server Compute",
    "Server Compute Input",
    "Server Compute Infer",
    "Server Compute Output",
    "Client Recv",
];

/// Throughput column passed through from the latency report.
pub const THROUGHPUT_COLUMN: &str = "Inferences/Second";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Grpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 8000,
            Protocol::Grpc => 8001,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How perf_analyzer decides a measurement window is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    #[value(name = "time_windows")]
    TimeWindows,
    #[value(name = "count_windows")]
    CountWindows,
}

impl MeasurementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementMode::TimeWindows => "time_windows",
            MeasurementMode::CountWindows => "count_windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedMemory {
    Cuda,
}

impl SharedMemory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharedMemory::Cuda => "cuda",
        }
    }
}

/// Value of a free-form tool flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> Self {
        FlagValue::Str(s.to_string())
    }
}

impl From<i64> for FlagValue {
    fn from(n: i64) -> Self {
        FlagValue::Int(n)
    }
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> Self {
        FlagValue::Bool(b)
    }
}

/// How a single tool invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    /// Non-zero exit. `None` when the process was terminated by a signal.
    Failed(Option<i32>),
    TimedOut,
}

/// One invocation of the external tool.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub command: Vec<String>,
    pub output: String,
    pub status: AttemptStatus,
}

impl Attempt {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Metrics collected for one batch size: the raw columns of the last
/// latency report row plus the derived average latency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMeasurement {
    pub batch_size: u32,
    pub columns: Vec<(String, String)>,
    pub avg_latency: u64,
}

impl BatchMeasurement {
    pub fn column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Latency components present in this row, in report order.
    pub fn latency_components(&self) -> Vec<(&'static str, u64)> {
        LATENCY_COMPONENTS
            .iter()
            .filter_map(|name| {
                let value = self.column(name)?.trim().parse().ok()?;
                Some((*name, value))
            })
            .collect()
    }
}
