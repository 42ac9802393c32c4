use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

/// Numbers below this are treated as seconds, anything above as milliseconds.
const SECONDS_CEILING: f64 = 100_000_000_000.0;

/// Normalize an upstream timestamp (epoch seconds, epoch millis, RFC 3339 or a
/// naive ISO datetime taken as UTC) to epoch milliseconds.
pub(crate) fn to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().map(number_to_millis),
        Value::String(s) => parse_text(s),
        _ => None,
    }
}

pub(crate) fn number_to_millis(n: f64) -> i64 {
    if n.abs() < SECONDS_CEILING {
        (n * 1000.0).round() as i64
    } else {
        n.round() as i64
    }
}

fn parse_text(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<f64>() {
        return Some(number_to_millis(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}
