use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{PerfError, Result};
use crate::types::MeasurementMode;

/// Defaults read from `config.toml`. Every key is optional; CLI flags win.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub analyzer_bin: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub server_url: Option<String>,
    pub instances: Option<u32>,
    pub measurement_window: Option<u64>,
    pub measurement_mode: Option<MeasurementMode>,
    pub measurement_request_count: Option<u64>,
    pub input_data: Option<String>,
    pub scratch_dir: Option<PathBuf>,
    pub stream_output: Option<bool>,
}

/// `<config_dir>/perf-sweep/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("perf-sweep").join("config.toml"))
}

/// Load the config file.
///
/// An explicit path must exist. The default location is optional and yields
/// an empty config when absent.
pub fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(FileConfig::default()),
        },
    };

    if !required && !path.is_file() {
        return Ok(FileConfig::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| PerfError::Config {
        path: path.clone(),
        detail: e.to_string(),
    })?;

    parse_config(&text).map_err(|detail| PerfError::Config { path, detail })
}

pub fn parse_config(text: &str) -> std::result::Result<FileConfig, String> {
    toml::from_str(text).map_err(|e| e.message().to_string())
}
