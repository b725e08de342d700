// Rateio - Core Library
// Two-stage proportional allocation of financial entries over metric-derived groups.
// Exposes all modules for use in the CLI and tests

pub mod row;
pub mod error;
pub mod allocation;  // filter → ratio → expand
pub mod engine;      // Stage orchestrator
pub mod balance;     // Value conservation check
pub mod config;
pub mod dates;       // Date normalization (ingestion)
pub mod ingest;
pub mod db;          // SQLite sink + run audit trail
pub mod export;      // CSV / JSON sinks
pub mod pipeline;    // Ingestion → stages → all-or-nothing sinks

// Re-export commonly used types
pub use row::Row;
pub use error::{RateioError, Result};
pub use allocation::{
    compute_ratios, expand, filter_rows, partition_rows,
    AllocationColumns, AllocationGroup, Criteria,
};
pub use engine::{PipelineOutput, RateioEngine, StageOutput, StageSummary};
pub use balance::{BalanceCheck, BalanceResult};
pub use config::{ColumnNames, PipelineConfig, StageDefinition};
pub use dates::normalize_date;
pub use ingest::{load_datasets, load_inputs, prepare_rows};
pub use db::{
    RunEvent,
    setup_database, persist_pipeline, write_pipeline, get_runs, input_fingerprint,
    truncate_table, insert_rows, count_rows,
};
pub use export::{export_pipeline, stage_export, write_csv, write_json, StagedExport};
pub use pipeline::{publish, run_pipeline, PipelineReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
