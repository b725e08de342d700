// ➗ Allocation Ratio Calculator
// Groups metric rows by key attributes, sums their weight and derives each
// group's share of the grand total.

use crate::error::Result;
use crate::row::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// One distinct combination of grouping-key values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationGroup {
    /// (attribute, value) pairs in grouping-key order
    pub keys: Vec<(String, Value)>,

    /// Summed weight of the group's metric rows
    pub weight: f64,

    /// weight / grand total (0 when the grand total is not positive)
    pub ratio: f64,
}

impl AllocationGroup {
    /// Value of one grouping key
    pub fn key(&self, attr: &str) -> Option<&Value> {
        self.keys
            .iter()
            .find(|(name, _)| name == attr)
            .map(|(_, value)| value)
    }
}

/// Compute one allocation group per distinct key tuple
///
/// Rows whose key values are null do not belong to any group and are left
/// out of the grand total. Groups come back in first-seen order.
pub fn compute_ratios(
    rows: &[Row],
    group_keys: &[String],
    value_attr: &str,
) -> Result<Vec<AllocationGroup>> {
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<AllocationGroup> = Vec::new();
    let mut skipped = 0usize;

    for row in rows {
        let mut keys = Vec::with_capacity(group_keys.len());
        for attr in group_keys {
            keys.push((attr.clone(), row.require(attr)?.clone()));
        }
        let weight = row.number(value_attr)?;

        if keys.iter().any(|(_, value)| value.is_null()) {
            skipped += 1;
            continue;
        }

        let identity: Vec<String> = keys.iter().map(|(_, value)| group_identity(value)).collect();

        match index.get(&identity) {
            Some(&position) => groups[position].weight += weight,
            None => {
                index.insert(identity, groups.len());
                groups.push(AllocationGroup {
                    keys,
                    weight,
                    ratio: 0.0,
                });
            }
        }
    }

    if skipped > 0 {
        debug!(skipped, "metric rows with null grouping keys left out of ratios");
    }

    let total = total_weight(&groups);
    for group in &mut groups {
        group.ratio = if total > 0.0 { group.weight / total } else { 0.0 };
    }

    Ok(groups)
}

/// Hashable identity of a key value; numbers equal as f64 share one identity
fn group_identity(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            // -0.0 == 0.0
            Some(f) if f == 0.0 => "#0".to_string(),
            Some(f) => format!("#{:x}", f.to_bits()),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Sum of all group weights
pub fn total_weight(groups: &[AllocationGroup]) -> f64 {
    groups.iter().map(|g| g.weight).sum()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateioError;
    use proptest::prelude::*;
    use serde_json::json;

    fn create_test_metric(channel: &str, segment: &str, total: f64) -> Row {
        Row::new()
            .with("ds_canal_aquisicao", channel)
            .with("ds_segmento", segment)
            .with("total", total)
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_two_groups_share() {
        let rows = vec![
            create_test_metric("canalA", "segA", 600.0),
            create_test_metric("canalB", "segA", 400.0),
        ];

        let groups = compute_ratios(&rows, &keys(&["ds_canal_aquisicao", "ds_segmento"]), "total").unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key("ds_canal_aquisicao"), Some(&json!("canalA")));
        assert!((groups[0].ratio - 0.6).abs() < 1e-12);
        assert!((groups[1].ratio - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_weights_summed_per_group() {
        let rows = vec![
            create_test_metric("canalA", "segA", 100.0),
            create_test_metric("canalB", "segA", 200.0),
            create_test_metric("canalA", "segB", 700.0),
        ];

        let groups = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].weight, 300.0);
        assert_eq!(groups[1].weight, 700.0);
        assert!((groups[0].ratio - 0.3).abs() < 1e-12);
        assert_eq!(total_weight(&groups), 1000.0);
    }

    #[test]
    fn test_zero_weight_gives_zero_ratios() {
        let rows = vec![
            create_test_metric("canalA", "segA", 0.0),
            create_test_metric("canalB", "segB", 0.0),
        ];

        let groups = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap();

        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.ratio == 0.0));
    }

    #[test]
    fn test_empty_rows_give_no_groups() {
        let groups = compute_ratios(&[], &keys(&["ds_segmento"]), "total").unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_null_keys_left_out() {
        let rows = vec![
            create_test_metric("canalA", "segA", 50.0),
            Row::new()
                .with("ds_canal_aquisicao", "canalA")
                .with("ds_segmento", Value::Null)
                .with("total", 50.0),
        ];

        let groups = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ratio, 1.0);
    }

    #[test]
    fn test_numerically_equal_keys_share_group() {
        let rows = vec![
            Row::new().with("ds_segmento", 1).with("total", 30.0),
            Row::new().with("ds_segmento", 1.0).with("total", 70.0),
            Row::new().with("ds_segmento", "1").with("total", 100.0),
        ];

        let groups = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap();

        // "1" is a string, not the number 1
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key("ds_segmento"), Some(&json!(1)));
        assert_eq!(groups[0].weight, 100.0);
        assert_eq!(groups[0].ratio, 0.5);
        assert_eq!(groups[1].key("ds_segmento"), Some(&json!("1")));
    }

    #[test]
    fn test_non_numeric_weight_fails() {
        let rows = vec![Row::new().with("ds_segmento", "segA").with("total", "n/a")];
        let err = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap_err();
        assert!(matches!(err, RateioError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_key_fails() {
        let rows = vec![Row::new().with("total", 1.0)];
        let err = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap_err();
        assert!(matches!(err, RateioError::MissingAttribute { .. }));
    }

    proptest! {
        #[test]
        fn prop_ratios_sum_to_one(
            weights in prop::collection::vec((0usize..6, 0.0f64..1_000_000.0), 1..40)
        ) {
            prop_assume!(weights.iter().any(|(_, w)| *w > 0.0));

            let rows: Vec<Row> = weights
                .iter()
                .map(|(segment, w)| create_test_metric("canalA", &format!("seg{}", segment), *w))
                .collect();

            let groups = compute_ratios(&rows, &keys(&["ds_segmento"]), "total").unwrap();
            let sum: f64 = groups.iter().map(|g| g.ratio).sum();

            prop_assert!((sum - 1.0).abs() < 1e-9);
        }
    }
}
