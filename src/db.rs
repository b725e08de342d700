use crate::config::PipelineConfig;
use crate::engine::{PipelineOutput, StageSummary};
use crate::row::{columns, Row};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Run record for the audit trail ("every run is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunEvent {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub input_fingerprint: String,
    pub stages: Vec<StageSummary>,
}

impl RunEvent {
    pub fn new(input_fingerprint: &str, stages: Vec<StageSummary>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            input_fingerprint: input_fingerprint.to_string(),
            stages,
        }
    }
}

/// SHA-256 of the inputs, so reruns over identical data are recognizable
pub fn input_fingerprint(entries: &[Row], metrics: &[Row]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(entries)?);
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(metrics)?);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rateio_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            input_fingerprint TEXT NOT NULL,
            stages TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_fingerprint ON rateio_runs(input_fingerprint)",
        [],
    )?;

    Ok(())
}

/// Double-quoted SQL identifier
fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('"') || name.contains('\0') {
        bail!("Invalid SQL identifier: {:?}", name);
    }
    Ok(format!("\"{}\"", name))
}

/// Column names of an existing table (empty when the table does not exist)
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)?))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Create the destination table when missing, add missing columns, remove all rows
///
/// SQLite has no TRUNCATE; an unqualified DELETE uses the truncate optimization.
pub fn truncate_table(conn: &Connection, table: &str, columns: &[String]) -> Result<()> {
    let table_sql = quote_identifier(table)?;
    let existing = table_columns(conn, table)?;

    if existing.is_empty() {
        let column_sql = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        if column_sql.is_empty() {
            conn.execute(&format!("CREATE TABLE {} (rowid_only INTEGER)", table_sql), [])?;
        } else {
            conn.execute(&format!("CREATE TABLE {} ({})", table_sql, column_sql), [])?;
        }
        debug!(table, columns = columns.len(), "table created");
    } else {
        for column in columns.iter().filter(|c| !existing.contains(c)) {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {}", table_sql, quote_identifier(column)?),
                [],
            )?;
            debug!(table, column = %column, "column added");
        }
    }

    conn.execute(&format!("DELETE FROM {}", table_sql), [])?;
    Ok(())
}

fn to_sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(*b as i64),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

/// Bulk insert rows through one prepared statement; attributes a row lacks are
/// stored as NULL
///
/// The caller's transaction makes the insert atomic. `batch_size` only sets how
/// often progress is logged.
pub fn insert_rows(
    conn: &Connection,
    table: &str,
    columns: &[String],
    rows: &[Row],
    batch_size: usize,
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let column_sql = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table)?,
        column_sql,
        placeholders
    ))?;

    let mut inserted = 0;
    for batch in rows.chunks(batch_size.max(1)) {
        for row in batch {
            let values = columns.iter().map(|c| to_sql_value(row.get(c)));
            inserted += stmt.execute(params_from_iter(values))?;
        }
        debug!(table, inserted, "insert progress");
    }

    Ok(inserted)
}

pub fn insert_run(conn: &Connection, event: &RunEvent) -> Result<()> {
    let stages_json = serde_json::to_string(&event.stages)?;

    conn.execute(
        "INSERT INTO rateio_runs (run_id, timestamp, input_fingerprint, stages)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.run_id,
            event.timestamp.to_rfc3339(),
            event.input_fingerprint,
            stages_json,
        ],
    )?;

    Ok(())
}

/// Audit trail, newest first
pub fn get_runs(conn: &Connection) -> Result<Vec<RunEvent>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, timestamp, input_fingerprint, stages
         FROM rateio_runs
         ORDER BY id DESC",
    )?;

    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(run_id, timestamp, input_fingerprint, stages)| {
            Ok(RunEvent {
                run_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .context("Invalid run timestamp")?
                    .with_timezone(&Utc),
                input_fingerprint,
                stages: serde_json::from_str(&stages).context("Invalid run stages JSON")?,
            })
        })
        .collect()
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)?),
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Truncate and fill both stage tables and log the run
///
/// Does not commit: callers pass an open transaction and decide when the
/// writes become visible.
pub fn write_pipeline(
    conn: &Connection,
    output: &PipelineOutput,
    fingerprint: &str,
    config: &PipelineConfig,
) -> Result<RunEvent> {
    for (stage, table) in output.stages().iter().zip(&config.stage_tables) {
        let cols = columns(&stage.records);
        truncate_table(conn, table, &cols)
            .with_context(|| format!("Failed to truncate {}", table))?;
        let inserted = insert_rows(conn, table, &cols, &stage.records, config.batch_size)
            .with_context(|| format!("Failed to insert into {}", table))?;
        info!(table = %table, inserted, "stage records inserted");
    }

    let event = RunEvent::new(
        fingerprint,
        output.stages().iter().map(|s| s.summary.clone()).collect(),
    );
    insert_run(conn, &event)?;

    Ok(event)
}

/// `write_pipeline` in its own transaction
pub fn persist_pipeline(
    conn: &mut Connection,
    output: &PipelineOutput,
    fingerprint: &str,
    config: &PipelineConfig,
) -> Result<RunEvent> {
    let tx = conn.transaction()?;
    let event = write_pipeline(&tx, output, fingerprint, config)?;
    tx.commit()?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RateioEngine;
    use serde_json::json;

    fn create_test_record(center: i64, value: f64, marker: i64) -> Row {
        Row::new()
            .with("id_centro_resultado", center)
            .with("valor", value)
            .with("dt_competencia", "2024-10-01")
            .with("valor_rateado", value)
            .with("etapa_rateio", marker)
    }

    fn sample_output() -> (Vec<Row>, Vec<Row>, PipelineOutput) {
        let entries = vec![
            Row::new()
                .with("id_centro_resultado", 100)
                .with("valor", 1000.0)
                .with("dt_competencia", "2024-10-15"),
            Row::new()
                .with("id_centro_resultado", 999)
                .with("valor", 5.5)
                .with("dt_competencia", "2024-10-15"),
        ];
        let metrics = vec![
            Row::new()
                .with("ds_canal_aquisicao", "canalA")
                .with("ds_segmento", "segA")
                .with("ds_metrica", "metrica_2")
                .with("dt_referencia", "2024-10-01")
                .with("total", 600.0),
            Row::new()
                .with("ds_canal_aquisicao", "canalB")
                .with("ds_segmento", "segA")
                .with("ds_metrica", "metrica_2")
                .with("dt_referencia", "2024-10-01")
                .with("total", 400.0),
        ];

        let engine =
            RateioEngine::new(entries.clone(), metrics.clone(), PipelineConfig::default()).unwrap();
        let output = engine.run().unwrap();
        (entries, metrics, output)
    }

    #[test]
    fn test_truncate_and_insert() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let rows = vec![create_test_record(100, 10.0, 1), create_test_record(999, 20.0, 0)];
        let cols = columns(&rows);

        truncate_table(&conn, "tb_rateio_1", &cols).unwrap();
        let inserted = insert_rows(&conn, "tb_rateio_1", &cols, &rows, 1).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(count_rows(&conn, "tb_rateio_1").unwrap(), 2);

        // Second load replaces, never appends
        truncate_table(&conn, "tb_rateio_1", &cols).unwrap();
        insert_rows(&conn, "tb_rateio_1", &cols, &rows[..1], 1000).unwrap();
        assert_eq!(count_rows(&conn, "tb_rateio_1").unwrap(), 1);

        println!("✅ Truncate/insert test PASSED");
    }

    #[test]
    fn test_nulls_and_new_columns() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = vec![create_test_record(100, 10.0, 1)];
        truncate_table(&conn, "tb", &columns(&first)).unwrap();

        let second = vec![create_test_record(999, 20.0, 0).with("ds_segmento", Value::Null)];
        let cols = columns(&second);
        truncate_table(&conn, "tb", &cols).unwrap();
        insert_rows(&conn, "tb", &cols, &second, 10).unwrap();

        let segment: Option<String> = conn
            .query_row("SELECT \"ds_segmento\" FROM tb", [], |row| row.get(0))
            .unwrap();
        let center: i64 = conn
            .query_row("SELECT \"id_centro_resultado\" FROM tb", [], |row| row.get(0))
            .unwrap();

        assert_eq!(segment, None);
        assert_eq!(center, 999);
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(truncate_table(&conn, "tb\"; DROP TABLE x; --", &[]).is_err());
    }

    #[test]
    fn test_persist_pipeline() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let (entries, metrics, output) = sample_output();
        let config = PipelineConfig::default();
        let fingerprint = input_fingerprint(&entries, &metrics).unwrap();

        let event = persist_pipeline(&mut conn, &output, &fingerprint, &config).unwrap();

        assert_eq!(count_rows(&conn, "tb_rateio_1").unwrap(), 3);
        assert_eq!(count_rows(&conn, "tb_rateio_2").unwrap(), 3);

        let runs = get_runs(&conn).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, event.run_id);
        assert_eq!(runs[0].stages.len(), 2);
        assert_eq!(runs[0].stages[0].allocated_records, 2);

        let total: f64 = conn
            .query_row("SELECT SUM(valor_rateado) FROM tb_rateio_2", [], |row| row.get(0))
            .unwrap();
        assert!((total - 1005.5).abs() < 1e-9);

        println!("✅ Persist pipeline test PASSED");
    }

    #[test]
    fn test_uncommitted_writes_roll_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let (entries, metrics, output) = sample_output();
        let fingerprint = input_fingerprint(&entries, &metrics).unwrap();

        {
            let tx = conn.transaction().unwrap();
            write_pipeline(&tx, &output, &fingerprint, &PipelineConfig::default()).unwrap();
            // dropped without commit
        }

        assert!(table_columns(&conn, "tb_rateio_1").unwrap().is_empty());
        assert!(get_runs(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let (entries, metrics, _) = sample_output();

        let a = input_fingerprint(&entries, &metrics).unwrap();
        let b = input_fingerprint(&entries, &metrics).unwrap();
        let c = input_fingerprint(&entries[..1], &metrics).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_to_sql_value() {
        assert_eq!(to_sql_value(None), SqlValue::Null);
        assert_eq!(to_sql_value(Some(&json!(3))), SqlValue::Integer(3));
        assert_eq!(to_sql_value(Some(&json!(2.5))), SqlValue::Real(2.5));
        assert_eq!(to_sql_value(Some(&json!("x"))), SqlValue::Text("x".to_string()));
        assert_eq!(to_sql_value(Some(&json!(true))), SqlValue::Integer(1));
    }
}
