// 🔀 Rateio Engine - Two-stage proportional allocation
//
// Each stage:
//   filter metrics → filter entries → ratios → expand → merge
//
// The merged stage output is the disjoint union of
//   (a) rows allocated by an earlier stage (carried unchanged),
//   (b) rows allocated by this stage (one per entry × group),
//   (c) rows not allocated so far (marker 0, original value).
// Stage 2 consumes stage 1's output as its entry set.

use crate::allocation::{compute_ratios, expand, partition_rows, total_weight, filter_rows};
use crate::config::{PipelineConfig, StageDefinition};
use crate::error::{RateioError, Result};
use crate::row::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

// ============================================================================
// STAGE RESULT
// ============================================================================

/// Counts describing one stage run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: u8,

    /// Entries matching the stage's period and result centers
    pub eligible_entries: usize,

    /// Allocation groups in the ratio table
    pub groups: usize,

    /// Sum of all group weights
    pub total_weight: f64,

    /// Records produced by this stage's expansion
    pub allocated_records: usize,

    /// Records allocated by an earlier stage, passed through
    pub carried_allocated: usize,

    /// Records left unallocated (marker 0)
    pub non_allocated: usize,

    /// Groups exist but their total weight is zero: allocated values are all 0
    pub zero_weight: bool,
}

impl StageSummary {
    pub fn total_records(&self) -> usize {
        self.allocated_records + self.carried_allocated + self.non_allocated
    }

    pub fn summary(&self) -> String {
        format!(
            "Stage {}: {} records ({} allocated from {} entries × {} groups, {} carried, {} not allocated)",
            self.stage,
            self.total_records(),
            self.allocated_records,
            self.eligible_entries,
            self.groups,
            self.carried_allocated,
            self.non_allocated
        )
    }
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: u8,
    pub records: Vec<Row>,
    pub summary: StageSummary,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub stage1: StageOutput,
    pub stage2: StageOutput,
}

impl PipelineOutput {
    pub fn stages(&self) -> [&StageOutput; 2] {
        [&self.stage1, &self.stage2]
    }
}

// ============================================================================
// RATEIO ENGINE
// ============================================================================

pub struct RateioEngine {
    entries: Vec<Row>,
    metrics: Vec<Row>,
    config: PipelineConfig,
}

impl RateioEngine {
    /// Create engine over fully materialized entries and metrics
    ///
    /// Fails when the stage definitions are inconsistent (e.g. two stages
    /// claiming the same result center).
    pub fn new(entries: Vec<Row>, metrics: Vec<Row>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        Ok(RateioEngine {
            entries,
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn entries(&self) -> &[Row] {
        &self.entries
    }

    pub fn metrics(&self) -> &[Row] {
        &self.metrics
    }

    /// Stage 1 over the raw entries
    pub fn process_first_stage(&self) -> Result<StageOutput> {
        self.process_stage(&self.config.stages[0], &self.entries)
    }

    /// Stage 2 over stage 1's output
    pub fn process_second_stage(&self, stage1: &StageOutput) -> Result<StageOutput> {
        self.process_stage(&self.config.stages[1], &stage1.records)
    }

    /// Run both stages; nothing is returned unless both succeed
    pub fn run(&self) -> Result<PipelineOutput> {
        let stage1 = self.process_first_stage()?;
        let stage2 = self.process_second_stage(&stage1)?;

        Ok(PipelineOutput { stage1, stage2 })
    }

    fn process_stage(&self, stage: &StageDefinition, input: &[Row]) -> Result<StageOutput> {
        let columns = &self.config.columns;
        let allocation_columns = columns.allocation();

        // 1. Metrics for this stage's period and criteria
        let metrics = filter_rows(
            &self.metrics,
            &columns.metric_date,
            &stage.months,
            &stage.metric_criteria,
        )?;
        debug!(stage = stage.marker, metrics = metrics.len(), "metrics filtered");

        // 2. Entries for this stage's period and result centers (marker-agnostic)
        let (eligible, rest) = partition_rows(
            input,
            &columns.entry_date,
            &stage.months,
            &stage.entry_criteria(columns),
        )?;

        for row in &eligible {
            let marker = self.current_marker(row)?;
            if marker != 0 {
                return Err(RateioError::AlreadyAllocated {
                    stage: stage.marker,
                    marker,
                    row: row.describe(),
                });
            }
        }
        debug!(stage = stage.marker, eligible = eligible.len(), "entries filtered");

        // 3. Ratio table
        let groups = compute_ratios(&metrics, &stage.group_keys, &columns.weight)?;
        let weight = total_weight(&groups);
        let zero_weight = !groups.is_empty() && weight <= 0.0;

        if zero_weight && !eligible.is_empty() {
            warn!(
                stage = stage.marker,
                entries = eligible.len(),
                "total metric weight is zero: allocated values will be 0"
            );
        }

        // 4. Expansion
        let allocated = expand(&eligible, &groups, &allocation_columns, stage.marker)?;

        // 5. Merge
        let mut carried = Vec::new();
        let mut pending = Vec::new();
        for row in rest {
            if self.current_marker(&row)? != 0 {
                carried.push(row);
            } else {
                pending.push(row);
            }
        }

        let eligible_entries = eligible.len();
        if groups.is_empty() && eligible_entries > 0 {
            warn!(
                stage = stage.marker,
                entries = eligible_entries,
                "no allocation groups: eligible entries kept unallocated"
            );
            pending.extend(eligible);
        }

        let non_allocated = pending
            .iter()
            .map(|row| self.unallocated(row))
            .collect::<Result<Vec<_>>>()?;

        let summary = StageSummary {
            stage: stage.marker,
            eligible_entries,
            groups: groups.len(),
            total_weight: weight,
            allocated_records: allocated.len(),
            carried_allocated: carried.len(),
            non_allocated: non_allocated.len(),
            zero_weight,
        };

        let mut records = carried;
        records.extend(allocated);
        records.extend(non_allocated);

        info!("{}", summary.summary());

        Ok(StageOutput {
            stage: stage.marker,
            records,
            summary,
        })
    }

    /// Marker of a row; rows that never went through a stage count as 0
    fn current_marker(&self, row: &Row) -> Result<i64> {
        let marker = &self.config.columns.marker;
        match row.get(marker) {
            None | Some(Value::Null) => Ok(0),
            Some(_) => row.integer(marker),
        }
    }

    /// Pass-through record: original value, no group keys, marker 0
    fn unallocated(&self, row: &Row) -> Result<Row> {
        let columns = &self.config.columns;
        let value = row.number(&columns.value)?;

        let mut record = row.clone();
        record.set(columns.allocated.clone(), value);
        for key in self.config.all_group_keys() {
            record.set(key, Value::Null);
        }
        record.set(columns.marker.clone(), 0);

        Ok(record)
    }
}

// ============================================================================
// TESTS
// ============================================================================
