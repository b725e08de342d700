// ⚠️ Engine Errors - Schema, value and configuration failures
// Every failure aborts the whole run: a dropped row would silently break
// the allocation-completeness invariant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateioError {
    /// Required attribute absent from a row
    #[error("missing attribute '{attribute}' in row {row}")]
    MissingAttribute { attribute: String, row: String },

    /// Monetary/weight attribute is not numeric
    #[error("attribute '{attribute}' is not numeric ({value}) in row {row}")]
    InvalidValue {
        attribute: String,
        value: String,
        row: String,
    },

    /// Date attribute is not a calendar date
    #[error("attribute '{attribute}' is not a valid date ({value}) in row {row}")]
    InvalidDate {
        attribute: String,
        value: String,
        row: String,
    },

    /// Two stages claim the same result centers
    #[error("stages share result centers {centers:?}")]
    OverlappingStages { centers: Vec<i64> },

    /// A row allocated by an earlier stage matched a later stage's filter
    #[error("row already allocated in stage {marker} is eligible again in stage {stage}: {row}")]
    AlreadyAllocated { stage: u8, marker: i64, row: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RateioError>;
