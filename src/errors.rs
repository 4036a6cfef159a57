use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum PerfError {
    #[error("Running {command} failed with exit status {}: {output}", display_code(.exit_code))]
    ToolFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Running {command} timed out after {timeout_secs}s: {output}")]
    Timeout {
        command: String,
        timeout_secs: u64,
        output: String,
    },

    #[error("Ran perf_analyzer {attempts} times, but no stable measurement was recorded")]
    RetriesExhausted { attempts: usize },

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to read metrics from {path}: {detail}")]
    Metrics { path: PathBuf, detail: String },

    #[error("Invalid server URL '{url}': {detail}")]
    InvalidServerUrl { url: String, detail: String },

    #[error("Invalid batch size list '{input}'. Expected comma separated positive integers")]
    InvalidBatchSizes { input: String },

    #[error("Failed to write report {path}: {detail}")]
    Report { path: PathBuf, detail: String },

    #[error("Failed to load config {path}: {detail}")]
    Config { path: PathBuf, detail: String },

    #[error("Attempted to get perf_analyzer output without a successful run")]
    NoOutput,
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

pub type Result<T, E = PerfError> = std::result::Result<T, E>;
