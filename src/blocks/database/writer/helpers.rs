// src/blocks/database/writer/helpers.rs
// Small helpers shared by the row writers.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::blocks::column_definition::json_path;
use crate::blocks::definitions::RowData;

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Serialized form stored in the `data` / `computed_data` TEXT columns.
pub fn data_text(data: &RowData) -> String {
    Value::Object(data.clone()).to_string()
}

/// JSON path as an SQL string literal, safe to splice into a statement.
pub fn path_literal(column_id: &str) -> String {
    format!("'{}'", json_path(column_id).replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_are_rfc3339_utc() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn ids_are_uuid_v4() {
        let id = new_id();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_ne!(id, new_id());
    }

    #[test]
    fn path_literal_escapes_single_quotes() {
        assert_eq!(path_literal("it's"), "'$.\"it''s\"'");
        let data = json!({"a": 1}).as_object().cloned().unwrap();
        assert_eq!(data_text(&data), "{\"a\":1}");
    }
}
