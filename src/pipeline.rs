// 🚚 Pipeline - Raw data → both stages → balance → sinks
//
// Sinks are all-or-nothing:
//   1. stage files are written under temporary names
//   2. stage tables are filled inside an open transaction
//   3. files are moved into place
//   4. the transaction commits (files are removed again if it cannot)
// Any failure before step 4 rolls the transaction back and leaves no file.

use crate::balance::{BalanceCheck, BalanceResult};
use crate::config::PipelineConfig;
use crate::db::{input_fingerprint, setup_database, write_pipeline, RunEvent};
use crate::engine::{PipelineOutput, RateioEngine};
use crate::export::{remove_files, stage_export};
use crate::ingest::load_inputs;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub output: PipelineOutput,

    /// Per-stage value conservation, stage 1 first
    pub balances: Vec<BalanceResult>,

    /// Audit record (only when a database is configured)
    pub run: Option<RunEvent>,

    /// Exported files (empty when export is disabled)
    pub files: Vec<PathBuf>,
}

/// Load inputs, run both stages, check balances and publish to every sink
pub fn run_pipeline(config: &PipelineConfig, export: bool) -> Result<PipelineReport> {
    // 1. Ingestion
    let (entries, metrics) = load_inputs(config)?;
    info!(entries = entries.len(), metrics = metrics.len(), "inputs ready");

    let fingerprint = input_fingerprint(&entries, &metrics)?;

    // 2. Both stages (nothing is written unless both succeed)
    let engine = RateioEngine::new(entries, metrics, config.clone())?;
    let output = engine.run()?;

    // 3. Value conservation per stage
    let check = BalanceCheck::new();
    let balances = vec![
        check.check(engine.entries(), &output.stage1.records, &config.columns)?,
        check.check(&output.stage1.records, &output.stage2.records, &config.columns)?,
    ];
    for (stage, balance) in (1..).zip(&balances) {
        if balance.is_balanced() {
            info!(stage, "value conserved: {}", balance.summary());
        } else {
            warn!(stage, "value not conserved: {}", balance.summary());
        }
    }

    // 4. Sinks
    let (run, files) = publish(&output, &fingerprint, config, export)?;

    info!("rateio processing complete");
    Ok(PipelineReport {
        output,
        balances,
        run,
        files,
    })
}

/// Write the stage outputs to the database and the export directory, or to neither
pub fn publish(
    output: &PipelineOutput,
    fingerprint: &str,
    config: &PipelineConfig,
    export: bool,
) -> Result<(Option<RunEvent>, Vec<PathBuf>)> {
    let staged = if export {
        Some(stage_export(&config.output_dir, output)?)
    } else {
        None
    };

    let mut conn = match &config.db_path {
        Some(db_path) => Some(
            Connection::open(db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        ),
        None => None,
    };

    let tx = match conn.as_mut() {
        Some(conn) => {
            setup_database(conn)?;
            Some(conn.transaction()?)
        }
        None => None,
    };

    let run = match &tx {
        Some(tx) => Some(write_pipeline(tx, output, fingerprint, config)?),
        None => None,
    };

    let files = match staged {
        Some(staged) => staged.publish()?,
        None => Vec::new(),
    };

    if let Some(tx) = tx {
        if let Err(err) = tx.commit() {
            remove_files(&files);
            return Err(err).context("Failed to commit stage tables");
        }
    }

    if let Some(run) = &run {
        info!(run_id = %run.run_id, db = ?config.db_path, "results persisted");
    }
    if !files.is_empty() {
        info!(files = files.len(), dir = ?config.output_dir, "results exported");
    }

    Ok((run, files))
}

// ============================================================================
// TESTS
// ============================================================================
