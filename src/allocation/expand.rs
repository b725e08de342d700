// ✖️ Allocation Record Expander
// Crosses eligible entries with allocation groups: one output record per
// (entry, group) pair, carrying every entry attribute forward.

use crate::allocation::ratio::AllocationGroup;
use crate::error::{RateioError, Result};
use crate::row::Row;
use serde::{Deserialize, Serialize};

/// Attribute names written on allocation records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationColumns {
    /// Entry's original monetary value
    pub value: String,

    /// Value assigned to the record (value × ratio)
    pub allocated: String,

    /// Stage marker (0 = not allocated)
    pub marker: String,
}

impl Default for AllocationColumns {
    fn default() -> Self {
        AllocationColumns {
            value: "valor".to_string(),
            allocated: "valor_rateado".to_string(),
            marker: "etapa_rateio".to_string(),
        }
    }
}

/// Allocation records of one entry, produced lazily
///
/// The entry value and every allocated product are validated up front, so
/// the iterator itself cannot fail.
pub fn expand_entry<'a>(
    entry: &'a Row,
    groups: &'a [AllocationGroup],
    columns: &'a AllocationColumns,
    stage: u8,
) -> Result<impl Iterator<Item = Row> + 'a> {
    let value = entry.number(&columns.value)?;

    // A non-finite product would be serialized as null
    if let Some(group) = groups.iter().find(|g| !(value * g.ratio).is_finite()) {
        return Err(RateioError::InvalidValue {
            attribute: columns.allocated.clone(),
            value: format!("{} * {}", value, group.ratio),
            row: entry.describe(),
        });
    }

    Ok(groups.iter().map(move |group| {
        let mut record = entry.clone();
        record.set(columns.allocated.clone(), value * group.ratio);
        record.set(columns.marker.clone(), stage);
        for (attr, key_value) in &group.keys {
            record.set(attr.clone(), key_value.clone());
        }
        record
    }))
}

/// Full cross product of entries × groups
///
/// Returns an empty list when `groups` is empty; routing those entries to
/// the non-allocated set is the caller's job.
pub fn expand(
    entries: &[Row],
    groups: &[AllocationGroup],
    columns: &AllocationColumns,
    stage: u8,
) -> Result<Vec<Row>> {
    let mut records = Vec::with_capacity(entries.len() * groups.len());

    for entry in entries {
        records.extend(expand_entry(entry, groups, columns, stage)?);
    }

    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================
