use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

/// Reads a JSON value as a point in time.
///
/// Accepts RFC 3339 strings, plain `YYYY-MM-DD` dates (midnight UTC) and
/// millisecond epoch numbers.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
                return Some(instant.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
            Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
        }
        Value::Number(number) => {
            let millis = number.as_f64()?;
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

pub fn format_date(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}
