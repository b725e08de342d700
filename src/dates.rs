// 📅 Date Normalization - Free-form date strings → calendar dates
// Heuristic for raw exports mixing ISO, slash and day-first formats.
// Slash dates with a four-digit last part are read day-first (DD/MM/YYYY).

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Timestamps above this magnitude are taken as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Formats tried after the ISO and slash heuristics
const FALLBACK_FORMATS: &[&str] = &["%d-%m-%Y", "%d.%m.%Y", "%Y.%m.%d", "%Y%m%d"];

const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Normalize one raw value; null and empty strings mean "no date"
pub fn normalize_date(value: &Value) -> Result<Option<NaiveDate>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_date_str(s.trim()).map(Some),
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| anyhow!("Invalid timestamp: {}", n))?;
            from_timestamp(secs).map(Some)
        }
        other => Err(anyhow!("Unsupported date value: {}", other)),
    }
}

/// Normalized `YYYY-MM-DD` rendering (null when there is no date)
pub fn normalize_date_value(value: &Value) -> Result<Value> {
    Ok(match normalize_date(value)? {
        Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        None => Value::Null,
    })
}

fn parse_date_str(s: &str) -> Result<NaiveDate> {
    // YYYY-MM-DD (possibly with a time part)
    if let Some(head) = s.get(..10) {
        let parts: Vec<&str> = head.split('-').collect();
        if parts.len() == 3 && parts[0].len() == 4 {
            if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Ok(date);
            }
        }
    }

    // Slash dates: YYYY/MM/DD or DD/MM/YYYY
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 3 {
            let (year, month, day) = if parts[0].len() == 4 {
                (parts[0], parts[1], parts[2])
            } else if parts[2].len() == 4 {
                (parts[2], parts[1], parts[0])
            } else {
                ("", "", "")
            };

            if !year.is_empty() {
                let iso = format!("{}-{}-{}", year, month, day);
                if let Ok(date) = NaiveDate::parse_from_str(&iso, "%Y-%m-%d") {
                    return Ok(date);
                }
            }
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }

    for fmt in FALLBACK_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    for fmt in FALLBACK_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    if let Ok(secs) = s.parse::<i64>() {
        return from_timestamp(secs);
    }

    Err(anyhow!("Unrecognized date: '{}'", s))
}

fn from_timestamp(raw: i64) -> Result<NaiveDate> {
    let secs = if raw.abs() >= MILLIS_THRESHOLD { raw / 1000 } else { raw };

    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| anyhow!("Timestamp out of range: {}", raw))
}

// ============================================================================
// TESTS
// ============================================================================
