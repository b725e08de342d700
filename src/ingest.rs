// 📂 Ingestion - Raw JSON datasets → rows
// Reads every .json file of the raw directory, one dataset per file stem.
// Date columns are normalized here so the engine only sees calendar dates.

use crate::config::PipelineConfig;
use crate::dates::normalize_date_value;
use crate::row::Row;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Regular files of a directory, sorted by name
pub fn list_files_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Directory not found: {:?}", dir);
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths)
}

/// Read and parse one JSON file
pub fn read_json_file(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;

    serde_json::from_str(&content).with_context(|| format!("Invalid JSON file: {:?}", path))
}

/// (file stem, parsed JSON) for every .json file; other files are skipped
pub fn read_raw_files(dir: &Path) -> Result<Vec<(String, Value)>> {
    let mut results = Vec::new();

    for path in list_files_directory(dir)? {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if !is_json {
            warn!(file = ?path, "unsupported file skipped");
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Invalid file name: {:?}", path))?
            .to_string();

        results.push((stem, read_json_file(&path)?));
    }

    Ok(results)
}

/// Records keyed by id (`{"1": {...}, "2": {...}}`) or a plain array of records
pub fn convert_to_rows(data: Value) -> Result<Vec<Row>> {
    let records: Vec<Value> = match data {
        Value::Object(map) => map.into_iter().map(|(_, record)| record).collect(),
        Value::Array(items) => items,
        other => bail!("Expected object or array of records, found {}", type_name(&other)),
    };

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| match record {
            Value::Object(map) => Ok(Row::from(map)),
            other => Err(anyhow!(
                "Record {} is not an object ({})",
                i,
                type_name(&other)
            )),
        })
        .collect()
}

/// All datasets of a directory, keyed by file stem
pub fn load_datasets(dir: &Path) -> Result<BTreeMap<String, Vec<Row>>> {
    info!(dir = ?dir, "loading raw JSON files");

    let mut datasets = BTreeMap::new();
    for (name, data) in read_raw_files(dir)? {
        let rows = convert_to_rows(data).with_context(|| format!("Dataset '{}'", name))?;
        info!(dataset = %name, rows = rows.len(), "dataset loaded");
        datasets.insert(name, rows);
    }

    Ok(datasets)
}

/// Normalize the listed date columns of every row (absent columns stay absent)
pub fn prepare_rows(rows: &mut [Row], date_columns: &[String]) -> Result<()> {
    for (i, row) in rows.iter_mut().enumerate() {
        for column in date_columns {
            let normalized = match row.get(column) {
                Some(value) => normalize_date_value(value)
                    .with_context(|| format!("Row {}: column '{}'", i, column))?,
                None => continue,
            };
            row.set(column.clone(), normalized);
        }
    }

    Ok(())
}

/// Entries and metrics ready for the engine
pub fn load_inputs(config: &PipelineConfig) -> Result<(Vec<Row>, Vec<Row>)> {
    let mut datasets = load_datasets(&config.input_dir)?;

    let mut entries = datasets
        .remove(&config.entries_dataset)
        .ok_or_else(|| anyhow!("Dataset '{}' not found in {:?}", config.entries_dataset, config.input_dir))?;
    let mut metrics = datasets
        .remove(&config.metrics_dataset)
        .ok_or_else(|| anyhow!("Dataset '{}' not found in {:?}", config.metrics_dataset, config.input_dir))?;

    prepare_rows(&mut entries, &config.entry_date_columns)
        .with_context(|| format!("Dataset '{}'", config.entries_dataset))?;
    prepare_rows(&mut metrics, &config.metric_date_columns)
        .with_context(|| format!("Dataset '{}'", config.metrics_dataset))?;

    Ok((entries, metrics))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
