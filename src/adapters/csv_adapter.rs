//! CSV file data adapter.
//!
//! Each asset has two files under the base directory:
//!
//! - `<asset>.observations.csv`: `timestamp,price,<factor>...`
//! - `<asset>.fills.csv`: `timestamp,direction,input_amount,output_amount[,success]`
//!
//! Timestamps are RFC 3339 or integer unix milliseconds. Factor headers are
//! canonicalized on read; an empty factor cell means the factor is absent.
//! When two headers share a canonical name (`tvl` and `liquidity`), the
//! rightmost non-empty cell wins and a warning is logged.

use crate::domain::error::TrendgateError;
use crate::domain::factor::{normalize_factor_name, FactorMap};
use crate::domain::fill::{Direction, Fill};
use crate::domain::observation::Observation;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

const OBSERVATIONS_SUFFIX: &str = ".observations.csv";
const FILLS_SUFFIX: &str = ".fills.csv";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn observations_path(&self, asset: &str) -> PathBuf {
        self.base_path.join(format!("{asset}{OBSERVATIONS_SUFFIX}"))
    }

    fn fills_path(&self, asset: &str) -> PathBuf {
        self.base_path.join(format!("{asset}{FILLS_SUFFIX}"))
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| format!("timestamp {ms} out of range"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

/// Header pairs `(earlier, later, canonical)` that name the same factor.
fn colliding_factor_columns(headers: &[String]) -> Vec<(String, String, String)> {
    let canonical: Vec<String> = headers.iter().map(|h| normalize_factor_name(h)).collect();
    let mut collisions = Vec::new();
    for (later, name) in canonical.iter().enumerate() {
        if let Some(earlier) = canonical[..later].iter().position(|c| c == name) {
            collisions.push((headers[earlier].clone(), headers[later].clone(), name.clone()));
        }
    }
    collisions
}

fn parse_success(raw: Option<&str>) -> Result<bool, String> {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(format!("invalid success flag '{other}'")),
    }
}

fn parse_amount(raw: Option<&str>, column: &str) -> Result<f64, String> {
    raw.ok_or_else(|| format!("missing {column} column"))?
        .trim()
        .parse()
        .map_err(|e| format!("invalid {column} value: {e}"))
}

impl DataPort for CsvAdapter {
    fn list_assets(&self) -> Result<Vec<String>, TrendgateError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| TrendgateError::DataSource {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut assets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrendgateError::DataSource {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(asset) = name_str.strip_suffix(OBSERVATIONS_SUFFIX) {
                assets.push(asset.to_string());
            }
        }

        assets.sort();
        Ok(assets)
    }

    fn fetch_observations(&self, asset: &str) -> Result<Vec<Observation>, TrendgateError> {
        let path = self.observations_path(asset);
        let content = fs::read_to_string(&path).map_err(|e| TrendgateError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let row_error = |row: usize, reason: String| TrendgateError::DataRow {
            asset: asset.to_string(),
            kind: "observation",
            row,
            reason,
        };

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let factor_names: Vec<String> = rdr
            .headers()?
            .iter()
            .skip(2)
            .map(|h| h.trim().to_string())
            .collect();
        for (earlier, later, canonical) in colliding_factor_columns(&factor_names) {
            warn!(
                asset,
                earlier = %earlier,
                later = %later,
                factor = %canonical,
                "duplicate factor columns; the rightmost non-empty value wins"
            );
        }

        let mut observations = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let row = i + 1;
            let record = result?;

            let timestamp = record
                .get(0)
                .ok_or_else(|| row_error(row, "missing timestamp column".into()))
                .and_then(|s| parse_timestamp(s).map_err(|e| row_error(row, e)))?;

            let price = match record.get(1).map(str::trim) {
                None => return Err(row_error(row, "missing price column".into())),
                Some("") => f64::NAN,
                Some(s) => s
                    .parse()
                    .map_err(|e| row_error(row, format!("invalid price value: {e}")))?,
            };

            let mut factors = FactorMap::new();
            for (name, cell) in factor_names.iter().zip(record.iter().skip(2)) {
                let cell = cell.trim();
                if cell.is_empty() {
                    continue;
                }
                let value: f64 = cell
                    .parse()
                    .map_err(|e| row_error(row, format!("invalid {name} value: {e}")))?;
                factors.insert(name, value);
            }

            observations.push(Observation {
                timestamp,
                price,
                factors,
            });
        }

        Ok(observations)
    }

    fn fetch_fills(&self, asset: &str) -> Result<Vec<Fill>, TrendgateError> {
        let path = self.fills_path(asset);
        match fs::read_to_string(&path) {
            Ok(content) => parse_fills(&content, asset),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TrendgateError::DataSource {
                reason: format!("failed to read {}: {}", path.display(), e),
            }),
        }
    }
}

/// Read a standalone fills file. The file stem names the asset in errors.
pub fn read_fills(path: &Path) -> Result<Vec<Fill>, TrendgateError> {
    let content = fs::read_to_string(path).map_err(|e| TrendgateError::DataSource {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let asset = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_fills(&content, &asset)
}

fn parse_fills(content: &str, asset: &str) -> Result<Vec<Fill>, TrendgateError> {
    let row_error = |row: usize, reason: String| TrendgateError::DataRow {
        asset: asset.to_string(),
        kind: "fill",
        row,
        reason,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut fills = Vec::new();

    for (i, result) in rdr.records().enumerate() {
        let row = i + 1;
        let record = result?;

        let timestamp = record
            .get(0)
            .ok_or_else(|| row_error(row, "missing timestamp column".into()))
            .and_then(|s| parse_timestamp(s).map_err(|e| row_error(row, e)))?;

        let direction: Direction = record
            .get(1)
            .ok_or_else(|| row_error(row, "missing direction column".into()))?
            .parse()
            .map_err(|e| row_error(row, e))?;

        let input_amount =
            parse_amount(record.get(2), "input_amount").map_err(|e| row_error(row, e))?;
        let output_amount =
            parse_amount(record.get(3), "output_amount").map_err(|e| row_error(row, e))?;
        let success = parse_success(record.get(4)).map_err(|e| row_error(row, e))?;

        fills.push(Fill {
            direction,
            input_amount,
            output_amount,
            timestamp,
            success,
        });
    }

    Ok(fills)
}
