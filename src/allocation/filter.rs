// 🗓️ Period/Criteria Filter
// Keeps rows whose date falls in one of the given calendar months and whose
// attributes match every exact-match criterion.

use crate::error::Result;
use crate::row::{values_equal, Row};
use chrono::Datelike;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// attribute → allowed values (row must match one of them)
pub type Criteria = BTreeMap<String, Vec<Value>>;

/// Check a single row against the period and criteria
///
/// The date is always parsed, even when a criterion would reject the row,
/// so a malformed date never slips through unnoticed.
pub fn row_matches(
    row: &Row,
    date_attr: &str,
    months: &BTreeSet<u32>,
    criteria: &Criteria,
) -> Result<bool> {
    let date = row.date(date_attr)?;
    let mut matched = months.contains(&date.month());

    for (attr, allowed) in criteria {
        let value = row.require(attr)?;
        if !allowed.iter().any(|candidate| values_equal(value, candidate)) {
            matched = false;
        }
    }

    Ok(matched)
}

/// Return an independent copy of the matching rows
pub fn filter_rows(
    rows: &[Row],
    date_attr: &str,
    months: &BTreeSet<u32>,
    criteria: &Criteria,
) -> Result<Vec<Row>> {
    let mut matched = Vec::new();

    for row in rows {
        if row_matches(row, date_attr, months, criteria)? {
            matched.push(row.clone());
        }
    }

    Ok(matched)
}

/// Split rows into (matching, not matching), preserving input order
pub fn partition_rows(
    rows: &[Row],
    date_attr: &str,
    months: &BTreeSet<u32>,
    criteria: &Criteria,
) -> Result<(Vec<Row>, Vec<Row>)> {
    let mut matched = Vec::new();
    let mut rest = Vec::new();

    for row in rows {
        if row_matches(row, date_attr, months, criteria)? {
            matched.push(row.clone());
        } else {
            rest.push(row.clone());
        }
    }

    Ok((matched, rest))
}

// ============================================================================
// TESTS
// ============================================================================
