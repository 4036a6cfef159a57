use std::path::Path;

use crate::errors::{PerfError, Result};
use crate::types::{BatchMeasurement, LATENCY_COMPONENTS};

/// Read a perf_analyzer latency report and return the last row as
/// `(column, value)` pairs in file order.
///
/// perf_analyzer appends one row per measurement cycle; the last one is the
/// stable result.
pub fn read_last_row(path: &Path) -> Result<Vec<(String, String)>> {
    let metrics_err = |detail: String| PerfError::Metrics {
        path: path.to_path_buf(),
        detail,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| metrics_err(e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| metrics_err(format!("bad header: {e}")))?
        .clone();

    if headers.is_empty() {
        return Err(metrics_err("file is empty".to_string()));
    }

    let mut last = None;
    for record in reader.records() {
        let record = record.map_err(|e| metrics_err(e.to_string()))?;
        last = Some(record);
    }

    let record = last.ok_or_else(|| metrics_err("no measurement rows".to_string()))?;

    Ok(headers
        .iter()
        .zip(record.iter())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

/// Sum of the latency breakdown columns. Missing or blank columns count as 0.
pub fn calculate_average_latency(row: &[(String, String)]) -> std::result::Result<u64, String> {
    let mut total = 0u64;
    for name in LATENCY_COMPONENTS {
        let Some((_, value)) = row.iter().find(|(k, _)| k == name) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let parsed: u64 = value
            .parse()
            .map_err(|_| format!("column '{name}' is not an integer: '{value}'"))?;
        total = total
            .checked_add(parsed)
            .ok_or_else(|| format!("latency sum overflows at column '{name}'"))?;
    }
    Ok(total)
}

/// Build the measurement for `batch_size` from its latency report.
pub fn load_measurement(batch_size: u32, path: &Path) -> Result<BatchMeasurement> {
    let columns = read_last_row(path)?;
    let avg_latency = calculate_average_latency(&columns).map_err(|detail| PerfError::Metrics {
        path: path.to_path_buf(),
        detail,
    })?;
    Ok(BatchMeasurement {
        batch_size,
        columns,
        avg_latency,
    })
}
