// 🧾 Row - Schema-flexible record
// "Aggregates as maps, not structs": entries, metrics and allocation records
// are all ordered attribute maps, so every source attribute is carried forward.

use crate::error::{RateioError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum characters of a row shown in error messages
const DESCRIBE_LIMIT: usize = 160;

/// A single record: attribute name → JSON value, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    attributes: Map<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Row {
            attributes: Map::new(),
        }
    }

    /// Builder: add an attribute
    pub fn with(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attr.into(), value.into());
        self
    }

    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.attributes.get(attr)
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.attributes.contains_key(attr)
    }

    /// Insert or overwrite an attribute (keeps its original position when present)
    pub fn set(&mut self, attr: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(attr.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Attribute names in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.attributes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter()
    }

    /// Attribute that must be present (null counts as present)
    pub fn require(&self, attr: &str) -> Result<&Value> {
        self.attributes
            .get(attr)
            .ok_or_else(|| RateioError::MissingAttribute {
                attribute: attr.to_string(),
                row: self.describe(),
            })
    }

    /// Numeric attribute; numeric strings are accepted
    pub fn number(&self, attr: &str) -> Result<f64> {
        let value = self.require(attr)?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        parsed
            .filter(|v| v.is_finite())
            .ok_or_else(|| RateioError::InvalidValue {
                attribute: attr.to_string(),
                value: value.to_string(),
                row: self.describe(),
            })
    }

    /// Integer attribute (result center ids, stage markers)
    pub fn integer(&self, attr: &str) -> Result<i64> {
        let value = self.require(attr)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };

        parsed.ok_or_else(|| RateioError::InvalidValue {
            attribute: attr.to_string(),
            value: value.to_string(),
            row: self.describe(),
        })
    }

    /// Calendar date attribute: `YYYY-MM-DD`, optionally with a time part
    pub fn date(&self, attr: &str) -> Result<NaiveDate> {
        let value = self.require(attr)?;

        value
            .as_str()
            .and_then(parse_calendar_date)
            .ok_or_else(|| RateioError::InvalidDate {
                attribute: attr.to_string(),
                value: value.to_string(),
                row: self.describe(),
            })
    }

    /// Compact JSON rendering for error messages
    pub fn describe(&self) -> String {
        let text = Value::Object(self.attributes.clone()).to_string();
        if text.chars().count() > DESCRIBE_LIMIT {
            let head: String = text.chars().take(DESCRIBE_LIMIT).collect();
            format!("{}…", head)
        } else {
            text
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.attributes
    }
}

impl From<Map<String, Value>> for Row {
    fn from(attributes: Map<String, Value>) -> Self {
        Row { attributes }
    }
}

/// Parse an already-normalized date string
fn parse_calendar_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Equality used by criteria matching: numbers compare by numeric value
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Union of attribute names across rows, in first-seen order
pub fn columns(rows: &[Row]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut columns = Vec::new();

    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }

    columns
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let row = Row::new()
            .with("id_centro_resultado", 100)
            .with("valor", "1250.50")
            .with("dt_competencia", "2024-10-15");

        assert_eq!(row.integer("id_centro_resultado").unwrap(), 100);
        assert_eq!(row.number("valor").unwrap(), 1250.50);
        assert_eq!(
            row.date("dt_competencia").unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()
        );
    }

    #[test]
    fn test_datetime_strings_are_dates() {
        let row = Row::new()
            .with("a", "2024-11-02T00:00:00")
            .with("b", "2024-11-02 13:45:00")
            .with("c", "2024-11-02T10:00:00-03:00");

        let expected = NaiveDate::from_ymd_opt(2024, 11, 2).unwrap();
        assert_eq!(row.date("a").unwrap(), expected);
        assert_eq!(row.date("b").unwrap(), expected);
        assert_eq!(row.date("c").unwrap(), expected);
    }

    #[test]
    fn test_missing_attribute_is_schema_error() {
        let row = Row::new().with("valor", 10.0);
        let err = row.number("total").unwrap_err();
        assert!(matches!(err, RateioError::MissingAttribute { ref attribute, .. } if attribute == "total"));
    }

    #[test]
    fn test_non_numeric_value_is_value_error() {
        let row = Row::new().with("valor", "abc").with("nulo", Value::Null);
        assert!(matches!(row.number("valor"), Err(RateioError::InvalidValue { .. })));
        assert!(matches!(row.number("nulo"), Err(RateioError::InvalidValue { .. })));
    }

    #[test]
    fn test_invalid_date() {
        let row = Row::new().with("dt", "15/10/2024").with("vazio", Value::Null);
        assert!(matches!(row.date("dt"), Err(RateioError::InvalidDate { .. })));
        assert!(matches!(row.date("vazio"), Err(RateioError::InvalidDate { .. })));
    }

    #[test]
    fn test_values_equal_numeric() {
        assert!(values_equal(&json!(100), &json!(100.0)));
        assert!(values_equal(&json!("canalA"), &json!("canalA")));
        assert!(!values_equal(&json!("100"), &json!(100)));
        assert!(!values_equal(&json!(204), &json!(100)));
    }

    #[test]
    fn test_set_keeps_position() {
        let mut row = Row::new().with("a", 1).with("b", 2);
        row.set("a", 3);
        row.set("c", 4);

        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(row.get("a"), Some(&json!(3)));
    }

    #[test]
    fn test_columns_union_first_seen() {
        let rows = vec![
            Row::new().with("a", 1).with("b", 2),
            Row::new().with("b", 1).with("c", 2).with("a", 0),
        ];
        assert_eq!(columns(&rows), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_describe_truncates() {
        let row = Row::new().with("texto", "x".repeat(500));
        assert!(row.describe().chars().count() <= DESCRIBE_LIMIT + 1);
    }
}
