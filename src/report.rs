use std::path::Path;

use chrono::{DateTime, Utc};
use owo_colors::{OwoColorize, Stream, Style};
use serde::Serialize;

use crate::errors::{PerfError, Result};
use crate::types::{BatchMeasurement, LATENCY_COMPONENTS, THROUGHPUT_COLUMN};

/// Column name for the derived latency in saved reports.
pub const AVG_LATENCY_COLUMN: &str = "avg latency";

/// Stable sort by ascending batch size.
pub fn sort_results(results: &mut [BatchMeasurement]) {
    results.sort_by_key(|m| m.batch_size);
}

/// Persist the report. A `.json` path gets JSON, anything else CSV.
pub fn save_results(path: &Path, results: &[BatchMeasurement], now: DateTime<Utc>) -> Result<()> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let content = if is_json {
        format_json(results, now)?
    } else {
        format_csv(results).map_err(|detail| PerfError::Report {
            path: path.to_path_buf(),
            detail,
        })?
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| PerfError::Report {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    }

    std::fs::write(path, content).map_err(|e| PerfError::Report {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Union of raw columns across rows, in first-seen order.
fn raw_columns(results: &[BatchMeasurement]) -> Vec<&str> {
    let mut columns: Vec<&str> = Vec::new();
    for m in results {
        for (name, _) in &m.columns {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }
    columns
}

/// CSV report: `batch_size`, every raw column, then the derived latency.
pub fn format_csv(results: &[BatchMeasurement]) -> std::result::Result<String, String> {
    let columns = raw_columns(results);
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["batch_size"];
    header.extend(columns.iter().copied());
    header.push(AVG_LATENCY_COLUMN);
    writer.write_record(&header).map_err(|e| e.to_string())?;

    for m in results {
        let mut record = vec![m.batch_size.to_string()];
        record.extend(
            columns
                .iter()
                .map(|c| m.column(c).unwrap_or_default().to_string()),
        );
        record.push(m.avg_latency.to_string());
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

#[derive(Serialize)]
struct JsonReport {
    generated_at: String,
    results: Vec<JsonRow>,
}

#[derive(Serialize)]
struct JsonRow {
    batch_size: u32,
    avg_latency: u64,
    columns: serde_json::Map<String, serde_json::Value>,
}

pub fn format_json(results: &[BatchMeasurement], now: DateTime<Utc>) -> Result<String> {
    let report = JsonReport {
        generated_at: now.to_rfc3339(),
        results: results
            .iter()
            .map(|m| JsonRow {
                batch_size: m.batch_size,
                avg_latency: m.avg_latency,
                columns: m
                    .columns
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            })
            .collect(),
    };
    let mut out = serde_json::to_string_pretty(&report).map_err(std::io::Error::other)?;
    out.push('\n');
    Ok(out)
}

fn style_header() -> Style {
    Style::new().bold()
}

/// Aligned table of batch size, throughput, latency components and average.
pub fn format_table(results: &[BatchMeasurement]) -> String {
    let mut headers: Vec<&str> = vec!["Batch", THROUGHPUT_COLUMN];
    let components: Vec<&str> = LATENCY_COMPONENTS
        .iter()
        .copied()
        .filter(|c| results.iter().any(|m| m.column(c).is_some()))
        .collect();
    headers.extend(components.iter().copied());
    headers.push("Avg Latency");

    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|m| {
            let mut row = vec![
                m.batch_size.to_string(),
                m.column(THROUGHPUT_COLUMN).unwrap_or("-").to_string(),
            ];
            row.extend(
                components
                    .iter()
                    .map(|c| m.column(c).filter(|v| !v.is_empty()).unwrap_or("-").to_string()),
            );
            row.push(m.avg_latency.to_string());
            row
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();

    let header_line = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:>width$}", h, width = w))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(
        &header_line
            .if_supports_color(Stream::Stdout, |s| s.style(style_header()))
            .to_string(),
    );
    out.push('\n');

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, w))| {
                let padded = format!("{:>width$}", cell, width = w);
                if i == 0 {
                    padded
                        .if_supports_color(Stream::Stdout, |s| s.cyan())
                        .to_string()
                } else if i == row.len() - 1 {
                    padded
                        .if_supports_color(Stream::Stdout, |s| s.yellow())
                        .to_string()
                } else {
                    padded
                }
            })
            .collect();
        out.push_str(&cells.join("  "));
        out.push('\n');
    }

    out
}

pub fn show_results(results: &[BatchMeasurement]) {
    print!("{}", format_table(results));
}
