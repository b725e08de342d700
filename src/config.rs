// ⚙️ Pipeline Configuration - Rules as Data
// Column names, stage definitions and I/O locations for one invocation.
// Every field has a default, so an empty JSON object is a valid config file.

use crate::allocation::{AllocationColumns, Criteria};
use crate::error::{RateioError, Result as EngineResult};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable supplying the SQLite path when the file does not
pub const DB_PATH_ENV: &str = "RATEIO_DB_PATH";

// ============================================================================
// COLUMN NAMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    /// Result center identifier on entries
    pub center: String,

    /// Entry monetary value
    pub value: String,

    /// Allocated value written on output records
    pub allocated: String,

    /// Stage marker written on output records
    pub marker: String,

    /// Entry competence date
    pub entry_date: String,

    /// Metric reference date
    pub metric_date: String,

    /// Metric name
    pub metric_name: String,

    /// Acquisition channel
    pub channel: String,

    /// Segment
    pub segment: String,

    /// Metric weight
    pub weight: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            center: "id_centro_resultado".to_string(),
            value: "valor".to_string(),
            allocated: "valor_rateado".to_string(),
            marker: "etapa_rateio".to_string(),
            entry_date: "dt_competencia".to_string(),
            metric_date: "dt_referencia".to_string(),
            metric_name: "ds_metrica".to_string(),
            channel: "ds_canal_aquisicao".to_string(),
            segment: "ds_segmento".to_string(),
            weight: "total".to_string(),
        }
    }
}

impl ColumnNames {
    pub fn allocation(&self) -> AllocationColumns {
        AllocationColumns {
            value: self.value.clone(),
            allocated: self.allocated.clone(),
            marker: self.marker.clone(),
        }
    }
}

// ============================================================================
// STAGE DEFINITION
// ============================================================================

/// What one allocation stage selects and how it groups metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Marker written on records allocated by this stage
    pub marker: u8,

    /// Calendar months (1-12) considered on both entries and metrics
    pub months: BTreeSet<u32>,

    /// Exact-match criteria on metric rows
    #[serde(default)]
    pub metric_criteria: Criteria,

    /// Result centers whose entries are allocated by this stage
    pub eligible_centers: Vec<i64>,

    /// Metric attributes defining the allocation groups
    pub group_keys: Vec<String>,
}

impl StageDefinition {
    /// Stage 1: metrica_2 over channels A/B, split by (channel, segment)
    pub fn first(columns: &ColumnNames) -> Self {
        let mut metric_criteria = Criteria::new();
        metric_criteria.insert(columns.metric_name.clone(), vec![json!("metrica_2")]);
        metric_criteria.insert(
            columns.channel.clone(),
            vec![json!("canalA"), json!("canalB")],
        );

        StageDefinition {
            marker: 1,
            months: [10, 11].into_iter().collect(),
            metric_criteria,
            eligible_centers: vec![100, 204],
            group_keys: vec![columns.channel.clone(), columns.segment.clone()],
        }
    }

    /// Stage 2: metrica_2 over every channel, split by segment
    pub fn second(columns: &ColumnNames) -> Self {
        let mut metric_criteria = Criteria::new();
        metric_criteria.insert(columns.metric_name.clone(), vec![json!("metrica_2")]);

        StageDefinition {
            marker: 2,
            months: [10, 11].into_iter().collect(),
            metric_criteria,
            eligible_centers: vec![268, 288],
            group_keys: vec![columns.segment.clone()],
        }
    }

    /// Criteria applied to entries: result center membership
    pub fn entry_criteria(&self, columns: &ColumnNames) -> Criteria {
        let mut criteria = Criteria::new();
        criteria.insert(
            columns.center.clone(),
            self.eligible_centers.iter().map(|c| json!(c)).collect(),
        );
        criteria
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnNames,

    /// Exactly two stages, run in order
    pub stages: Vec<StageDefinition>,

    /// File stem of the entries dataset
    pub entries_dataset: String,

    /// File stem of the metrics dataset
    pub metrics_dataset: String,

    /// Entry columns normalized to calendar dates on ingestion
    pub entry_date_columns: Vec<String>,

    /// Metric columns normalized to calendar dates on ingestion
    pub metric_date_columns: Vec<String>,

    pub input_dir: PathBuf,
    pub output_dir: PathBuf,

    /// SQLite database (persistence is skipped when absent)
    pub db_path: Option<PathBuf>,

    /// Destination tables, one per stage
    pub stage_tables: Vec<String>,

    /// Rows inserted between progress log lines (the load is one transaction
    /// either way)
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let columns = ColumnNames::default();
        let stages = vec![StageDefinition::first(&columns), StageDefinition::second(&columns)];

        PipelineConfig {
            stages,
            entries_dataset: "lancamentos".to_string(),
            metrics_dataset: "metricas".to_string(),
            entry_date_columns: vec![
                "dt_vencimento".to_string(),
                "dt_pagamento".to_string(),
                columns.entry_date.clone(),
            ],
            metric_date_columns: vec![columns.metric_date.clone()],
            input_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("data/processed"),
            db_path: None,
            stage_tables: vec!["tb_rateio_1".to_string(), "tb_rateio_2".to_string()],
            batch_size: 1000,
            columns,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// Fill the database path from the environment when not configured
    pub fn with_env_overrides(mut self) -> Self {
        if self.db_path.is_none() {
            if let Ok(path) = std::env::var(DB_PATH_ENV) {
                if !path.trim().is_empty() {
                    self.db_path = Some(PathBuf::from(path));
                }
            }
        }
        self
    }

    /// Check stage definitions before any data is touched
    pub fn validate(&self) -> EngineResult<()> {
        if self.stages.len() != 2 {
            return Err(RateioError::Config(format!(
                "expected 2 stages, found {}",
                self.stages.len()
            )));
        }

        if self.stage_tables.len() != self.stages.len() {
            return Err(RateioError::Config(format!(
                "expected {} stage tables, found {}",
                self.stages.len(),
                self.stage_tables.len()
            )));
        }

        if self.batch_size == 0 {
            return Err(RateioError::Config("batch_size must be positive".to_string()));
        }

        let mut previous_marker = 0u8;
        for stage in &self.stages {
            if stage.marker <= previous_marker {
                return Err(RateioError::Config(format!(
                    "stage markers must be non-zero and increasing, got {} after {}",
                    stage.marker, previous_marker
                )));
            }
            previous_marker = stage.marker;

            if stage.months.is_empty() {
                return Err(RateioError::Config(format!(
                    "stage {} has no months",
                    stage.marker
                )));
            }

            if let Some(month) = stage.months.iter().find(|m| !(1..=12).contains(*m)) {
                return Err(RateioError::Config(format!(
                    "stage {} has invalid month {}",
                    stage.marker, month
                )));
            }

            if stage.group_keys.is_empty() {
                return Err(RateioError::Config(format!(
                    "stage {} has no group keys",
                    stage.marker
                )));
            }
        }

        for (i, earlier) in self.stages.iter().enumerate() {
            for later in &self.stages[i + 1..] {
                let mut shared: Vec<i64> = earlier
                    .eligible_centers
                    .iter()
                    .filter(|c| later.eligible_centers.contains(*c))
                    .copied()
                    .collect();

                if !shared.is_empty() {
                    shared.sort_unstable();
                    shared.dedup();
                    return Err(RateioError::OverlappingStages { centers: shared });
                }
            }
        }

        Ok(())
    }

    /// Group keys of every stage, first-seen order (nulled on unallocated rows)
    pub fn all_group_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for stage in &self.stages {
            for key in &stage.group_keys {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.stages[0].eligible_centers, vec![100, 204]);
        assert_eq!(config.stages[1].eligible_centers, vec![268, 288]);
        assert_eq!(
            config.stages[0].group_keys,
            vec!["ds_canal_aquisicao", "ds_segmento"]
        );
        assert_eq!(config.stages[1].group_keys, vec!["ds_segmento"]);
        assert_eq!(config.all_group_keys(), vec!["ds_canal_aquisicao", "ds_segmento"]);
    }

    #[test]
    fn test_overlapping_centers_rejected() {
        let mut config = PipelineConfig::default();
        config.stages[1].eligible_centers = vec![204, 268];

        let err = config.validate().unwrap_err();
        assert!(matches!(err, RateioError::OverlappingStages { ref centers } if centers == &vec![204]));
    }

    #[test]
    fn test_invalid_months_rejected() {
        let mut config = PipelineConfig::default();
        config.stages[0].months = [13].into_iter().collect();
        assert!(matches!(config.validate(), Err(RateioError::Config(_))));

        config.stages[0].months = BTreeSet::new();
        assert!(matches!(config.validate(), Err(RateioError::Config(_))));
    }

    #[test]
    fn test_markers_must_increase() {
        let mut config = PipelineConfig::default();
        config.stages[1].marker = 1;
        assert!(matches!(config.validate(), Err(RateioError::Config(_))));
    }

    #[test]
    fn test_stage_count_fixed() {
        let mut config = PipelineConfig::default();
        config.stages.pop();
        assert!(matches!(config.validate(), Err(RateioError::Config(_))));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "db_path": "/tmp/rateio.db", "batch_size": 50, "input_dir": "entrada" }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();

        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/rateio.db")));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.input_dir, PathBuf::from("entrada"));
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.entries_dataset, "lancamentos");
    }

    #[test]
    fn test_from_file_stage_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "stages": [
                {{ "marker": 1, "months": [1, 2], "eligible_centers": [10],
                   "group_keys": ["ds_segmento"] }},
                {{ "marker": 2, "months": [3], "eligible_centers": [20],
                   "metric_criteria": {{ "ds_metrica": ["metrica_1"] }},
                   "group_keys": ["ds_segmento"] }}
            ] }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();

        assert!(config.validate().is_ok());
        assert!(config.stages[0].metric_criteria.is_empty());
        assert_eq!(config.stages[1].months, BTreeSet::from([3]));
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(PipelineConfig::from_file("/nonexistent/rateio.json").is_err());
    }
}
