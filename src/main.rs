use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rateio::{get_runs, run_pipeline, setup_database, PipelineConfig};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rateio", version, about = "Two-stage proportional allocation (rateio) of financial entries")]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load raw data, run both stages, persist and export the results
    Run {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory with lancamentos.json / metricas.json
        #[arg(long)]
        input: Option<PathBuf>,

        /// Directory for the exported stage files
        #[arg(long)]
        output: Option<PathBuf>,

        /// SQLite database receiving both stage tables
        #[arg(long)]
        db: Option<PathBuf>,

        /// Skip CSV/JSON export
        #[arg(long)]
        no_export: bool,
    },

    /// List previous runs recorded in the database
    Runs {
        #[arg(long)]
        db: PathBuf,
    },
}

/// Initialize tracing subscriber (RUST_LOG wins over the default level)
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Run {
            config,
            input,
            output,
            db,
            no_export,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_file(path)?,
                None => PipelineConfig::default(),
            };
            if let Some(input) = input {
                config.input_dir = input;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            if db.is_some() {
                config.db_path = db;
            }
            let config = config.with_env_overrides();
            let report = run_pipeline(&config, !no_export)?;
            for stage in report.output.stages() {
                println!("{}", stage.summary.summary());
            }
            Ok(())
        }
        Command::Runs { db } => list_runs(db),
    }
}

fn list_runs(db: PathBuf) -> Result<()> {
    let conn = Connection::open(&db).with_context(|| format!("Failed to open database {:?}", db))?;
    setup_database(&conn)?;

    let runs = get_runs(&conn)?;
    if runs.is_empty() {
        println!("No runs recorded in {:?}", db);
        return Ok(());
    }

    for run in runs {
        let short_fingerprint: String = run.input_fingerprint.chars().take(12).collect();
        println!(
            "{}  {}  input {}",
            run.timestamp.to_rfc3339(),
            run.run_id,
            short_fingerprint
        );
        for stage in &run.stages {
            println!("    {}", stage.summary());
        }
    }

    Ok(())
}
