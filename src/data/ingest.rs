//! CSV ingest and normalization.
//!
//! Turns a policy-level CSV (the freMTPL2freq layout or its snake_case
//! equivalent) into clean `Observation`s that are safe to fit.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors, exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic behavior** (no hidden randomness)

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{
    CLAIM_COUNT_COLUMN, EXPOSURE_COLUMN, FieldValue, Observation, RawRow, clamp_claim_count,
    clamp_exposure,
};
use crate::error::{AppError, ErrorKind};

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Ingest output: normalized observations + row errors.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub observations: Vec<Observation>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

impl IngestedData {
    pub fn rows_used(&self) -> usize {
        self.observations.len()
    }
}

/// Load observations from a CSV file.
pub fn load_observations(
    path: &Path,
    categorical: &[String],
    numeric: &[String],
) -> Result<IngestedData, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            ErrorKind::InvalidInput,
            format!("Failed to open CSV '{}': {e}", path.display()),
        )
    })?;
    read_observations(file, categorical, numeric)
}

/// Read observations from any CSV source.
pub fn read_observations<R: Read>(
    source: R,
    categorical: &[String],
    numeric: &[String],
) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let mut required: Vec<&str> = vec![EXPOSURE_COLUMN, CLAIM_COUNT_COLUMN];
    required.extend(categorical.iter().map(String::as_str));
    required.extend(numeric.iter().map(String::as_str));
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !header_map.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::new(
            ErrorKind::InvalidInput,
            format!("CSV is missing required columns: {}", missing.join(", ")),
        ));
    }

    let mut observations = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        rows_read += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("Unreadable row: {e}"),
                });
                continue;
            }
        };

        let id = field(&record, &header_map, "id")
            .map(str::to_string)
            .unwrap_or_else(|| (line - 1).to_string());

        match parse_row(&record, &header_map, categorical, numeric, &id) {
            Ok(obs) => observations.push(obs),
            Err(message) => row_errors.push(RowError {
                line,
                id: Some(id),
                message,
            }),
        }
    }

    if !row_errors.is_empty() {
        log::warn!("skipped {} of {rows_read} CSV rows", row_errors.len());
    }

    if observations.is_empty() {
        return Err(AppError::new(
            ErrorKind::InvalidInput,
            format!("No usable rows in CSV ({rows_read} read)."),
        ));
    }

    Ok(IngestedData {
        observations,
        row_errors,
        rows_read,
    })
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    categorical: &[String],
    numeric: &[String],
    id: &str,
) -> Result<Observation, String> {
    let raw_exposure = parse_number(record, header_map, EXPOSURE_COLUMN)?;
    let exposure = clamp_exposure(raw_exposure)
        .ok_or_else(|| format!("Exposure must be positive, got {raw_exposure}"))?;

    let raw_count = parse_number(record, header_map, CLAIM_COUNT_COLUMN)?;
    let claim_count = clamp_claim_count(raw_count)
        .ok_or_else(|| format!("Claim count must be non-negative, got {raw_count}"))?;

    let mut predictors = RawRow::new();
    for name in categorical {
        let value = field(record, header_map, name)
            .map(|v| v.trim_matches('\'').trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("Missing value for '{name}'"))?;
        predictors.insert(name.clone(), FieldValue::Text(value.to_string()));
    }
    for name in numeric {
        let value = parse_number(record, header_map, name)?;
        predictors.insert(name.clone(), FieldValue::Number(value));
    }

    Ok(Observation {
        id: id.to_string(),
        predictors,
        exposure,
        claim_count,
    })
}

fn parse_number(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    column: &str,
) -> Result<f64, String> {
    let raw = field(record, header_map, column).ok_or_else(|| format!("Missing value for '{column}'"))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("Invalid number for '{column}': '{raw}'"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("Non-finite value for '{column}'"))
    }
}

fn field<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, column: &str) -> Option<&'a str> {
    header_map
        .get(column)
        .and_then(|&idx| record.get(idx))
        .filter(|v| !v.is_empty())
}

/// Map canonical column names to CSV positions.
///
/// Headers are matched case-insensitively, ignoring punctuation, and the
/// original freMTPL2freq names are accepted as aliases.
fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (idx, raw) in headers.iter().enumerate() {
        let key = normalize_header(raw);
        let canonical = match key.as_str() {
            "idpol" | "id" | "policyid" => "id".to_string(),
            "claimnb" | "claimcount" | "claims" => CLAIM_COUNT_COLUMN.to_string(),
            "exposure" => EXPOSURE_COLUMN.to_string(),
            "vehpower" | "vehiclepower" => "vehicle_power".to_string(),
            "vehage" | "vehicleage" => "vehicle_age".to_string(),
            "drivage" | "driverage" => "driver_age".to_string(),
            "bonusmalus" => "bonus_malus".to_string(),
            "vehbrand" | "vehiclebrand" => "vehicle_brand".to_string(),
            "vehgas" | "vehiclegas" => "vehicle_gas".to_string(),
            // Unknown headers keep their snake_case spelling so custom
            // predictor lists still resolve.
            _ => raw.trim().to_ascii_lowercase(),
        };
        map.entry(canonical).or_insert(idx);
    }
    map
}

fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
