// ⚖️ Balance Check - Value conservation per stage
// Ensures: Σ current value of stage input = Σ allocated value of stage output
//
// The "current value" of an input row is its allocated value when it already
// went through a stage, otherwise its original value.

use crate::config::ColumnNames;
use crate::error::Result;
use crate::row::Row;
use serde::{Deserialize, Serialize};

// ============================================================================
// BALANCE RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceResult {
    /// Output value matches input value within tolerance
    Balanced { total: f64 },

    /// Value was created or lost (e.g. zero-weight ratio table)
    Discrepancy {
        expected: f64,
        actual: f64,
        difference: f64,
    },
}

impl BalanceResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, BalanceResult::Balanced { .. })
    }

    pub fn difference(&self) -> f64 {
        match self {
            BalanceResult::Balanced { .. } => 0.0,
            BalanceResult::Discrepancy { difference, .. } => *difference,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            BalanceResult::Balanced { total } => format!("balanced at {:.2}", total),
            BalanceResult::Discrepancy {
                expected,
                actual,
                difference,
            } => format!(
                "expected {:.2}, allocated {:.2}, difference {:.2}",
                expected, actual, difference
            ),
        }
    }
}

// ============================================================================
// BALANCE CHECK
// ============================================================================

pub struct BalanceCheck {
    /// Tolerance for floating-point comparisons (default: 0.01)
    pub tolerance: f64,
}

impl BalanceCheck {
    pub fn new() -> Self {
        BalanceCheck { tolerance: 0.01 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        BalanceCheck { tolerance }
    }

    /// Compare a stage's input with its output
    pub fn check(&self, input: &[Row], output: &[Row], columns: &ColumnNames) -> Result<BalanceResult> {
        let expected = current_total(input, columns)?;
        let actual = allocated_total(output, columns)?;
        let difference = (actual - expected).abs();

        if difference < self.tolerance {
            Ok(BalanceResult::Balanced { total: actual })
        } else {
            Ok(BalanceResult::Discrepancy {
                expected,
                actual,
                difference,
            })
        }
    }
}

impl Default for BalanceCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Σ allocated value when present, original value otherwise
fn current_total(rows: &[Row], columns: &ColumnNames) -> Result<f64> {
    let mut total = 0.0;
    for row in rows {
        total += if row.contains(&columns.allocated) {
            row.number(&columns.allocated)?
        } else {
            row.number(&columns.value)?
        };
    }
    Ok(total)
}

fn allocated_total(rows: &[Row], columns: &ColumnNames) -> Result<f64> {
    let mut total = 0.0;
    for row in rows {
        total += row.number(&columns.allocated)?;
    }
    Ok(total)
}

// ============================================================================
// TESTS
// ============================================================================
