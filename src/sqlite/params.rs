use chrono::NaiveDateTime;
use rusqlite::types::Value;

use crate::types::RowValues;

const TIMESTAMP_FORMAT: &str = "%F %T%.f";

/// Convert a single `RowValues` to a rusqlite `Value`.
///
/// `SQLite` has no boolean, timestamp, or JSON storage class: booleans become integers,
/// timestamps become `YYYY-MM-DD HH:MM:SS[.fff]` text, and JSON is stored as its text form.
///
/// Text in chrono's serialized form (`YYYY-MM-DDTHH:MM:SS[.fff]`, what a serde item carries for a
/// `NaiveDateTime` field) is rewritten to the same layout as a bound timestamp.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(normalize_timestamp_text(s)),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format(TIMESTAMP_FORMAT).to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

fn normalize_timestamp_text(s: &str) -> String {
    if s.as_bytes().get(10) == Some(&b'T')
        && let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
    {
        return dt.format(TIMESTAMP_FORMAT).to_string();
    }
    s.to_owned()
}

pub(crate) fn convert_params(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn storage_classes() {
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::JSON(json!({"a": 1}))),
            Value::Text(r#"{"a":1}"#.into())
        );
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(8, 5, 0))
            .unwrap();
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::Timestamp(ts)),
            Value::Text("2024-03-09 08:05:00".into())
        );
    }

    #[test]
    fn serialized_timestamps_match_bound_ones() {
        let text = |s: &str| row_value_to_sqlite_value(&RowValues::Text(s.into()));
        assert_eq!(
            text("2024-01-02T03:04:05"),
            Value::Text("2024-01-02 03:04:05".into())
        );
        assert_eq!(
            text("2024-01-02T03:04:05.250"),
            Value::Text("2024-01-02 03:04:05.250".into())
        );
        assert_eq!(
            text("2024-01-02T03:04:05Z"),
            Value::Text("2024-01-02T03:04:05Z".into())
        );
        assert_eq!(text("Tuesday"), Value::Text("Tuesday".into()));
    }
}
