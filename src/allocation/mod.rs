// Allocation building blocks
//
// Each stage runs the same three steps:
// 1. filter   - select rows by competence month + exact-match criteria
// 2. ratio    - group metric weights and derive each group's share
// 3. expand   - cross eligible entries with the groups, one record per pair

pub mod filter;
pub mod ratio;
pub mod expand;

pub use filter::{filter_rows, partition_rows, row_matches, Criteria};
pub use ratio::{compute_ratios, total_weight, AllocationGroup};
pub use expand::{expand, AllocationColumns};
