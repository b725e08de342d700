// 📤 Export - Stage outputs → CSV + JSON files
// Header = union of attributes in first-seen order; nulls become empty fields.

use crate::engine::PipelineOutput;
use crate::row::{columns, Row};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn write_csv(path: &Path, rows: &[Row]) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {:?}", path))?;

    let header = columns(rows);
    wtr.write_record(&header)?;

    for row in rows {
        wtr.write_record(header.iter().map(|c| csv_field(row.get(c))))?;
    }

    wtr.flush()?;
    Ok(rows.len())
}

pub fn write_json(path: &Path, rows: &[Row]) -> Result<usize> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create JSON file: {:?}", path))?;

    serde_json::to_writer(BufWriter::new(file), rows)
        .with_context(|| format!("Failed to write JSON file: {:?}", path))?;

    Ok(rows.len())
}

// ============================================================================
// STAGED EXPORT
// ============================================================================

/// Stage files written under temporary names in the output directory
///
/// Nothing is visible under the final names until `publish`. Temporary files
/// still pending when the value is dropped are removed.
#[derive(Debug)]
pub struct StagedExport {
    /// (temporary, final) path pairs
    files: Vec<(PathBuf, PathBuf)>,
}

impl StagedExport {
    pub fn targets(&self) -> Vec<PathBuf> {
        self.files.iter().map(|(_, target)| target.clone()).collect()
    }

    /// Move every staged file to its final name; all or none are published
    pub fn publish(mut self) -> Result<Vec<PathBuf>> {
        let files = std::mem::take(&mut self.files);
        let mut published = Vec::with_capacity(files.len());

        for (i, (temporary, target)) in files.iter().enumerate() {
            if let Err(err) = fs::rename(temporary, target) {
                remove_files(&published);
                for (pending, _) in &files[i..] {
                    remove_files(std::slice::from_ref(pending));
                }
                return Err(err).with_context(|| format!("Failed to move {:?} into place", target));
            }
            published.push(target.clone());
        }

        Ok(published)
    }
}

impl Drop for StagedExport {
    fn drop(&mut self) {
        for (temporary, _) in &self.files {
            remove_files(std::slice::from_ref(temporary));
        }
    }
}

/// Best-effort removal; missing files are fine
pub fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(file = ?path, error = %err, "failed to remove file");
            }
        }
    }
}

/// Write `rateio_etapa{N}.csv` and `rateio_etapa{N}.json` for both stages
/// under temporary names
pub fn stage_export(dir: &Path, output: &PipelineOutput) -> Result<StagedExport> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

    let mut staged = StagedExport { files: Vec::new() };
    for stage in output.stages() {
        let stem = format!("rateio_etapa{}", stage.stage);

        let csv_path = dir.join(format!("{}.csv", stem));
        let csv_temporary = dir.join(format!(".{}.csv.tmp", stem));
        staged.files.push((csv_temporary.clone(), csv_path));
        write_csv(&csv_temporary, &stage.records)?;

        let json_path = dir.join(format!("{}.json", stem));
        let json_temporary = dir.join(format!(".{}.json.tmp", stem));
        staged.files.push((json_temporary.clone(), json_path));
        write_json(&json_temporary, &stage.records)?;

        debug!(stage = stage.stage, records = stage.records.len(), "stage files staged");
    }

    Ok(staged)
}

/// Export both stages; on failure no stage file is left behind
pub fn export_pipeline(dir: &Path, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
    let written = stage_export(dir, output)?.publish()?;
    info!(files = written.len(), dir = ?dir, "stages exported");
    Ok(written)
}
