// src/blocks/column_type.rs
use chrono::{DateTime, NaiveDate};
use serde::{
    de::{self, Deserializer},
    Deserialize, Serialize,
};
use serde_json::Value;
use std::fmt;

/// Closed set of column types a block schema can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Currency,
    Date,
    Select,
    MultiSelect,
    Checkbox,
    Url,
    Email,
    Formula,
    Rollup,
    Lookup,
    CreatedTime,
    CreatedBy,
    LastEditedTime,
    LastEditedBy,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Accepts the snake_case names plus the dashed spellings used by older clients.
impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_column_type(&raw)
            .ok_or_else(|| de::Error::custom(format!("Unknown column type '{}'", raw)))
    }
}

pub fn parse_column_type(s: &str) -> Option<ColumnType> {
    let norm = s.trim().to_ascii_lowercase().replace('-', "_");
    match norm.as_str() {
        "text" | "string" | "rich_text" => Some(ColumnType::Text),
        "number" => Some(ColumnType::Number),
        "currency" => Some(ColumnType::Currency),
        "date" => Some(ColumnType::Date),
        "select" => Some(ColumnType::Select),
        "multi_select" | "multiselect" => Some(ColumnType::MultiSelect),
        "checkbox" | "bool" => Some(ColumnType::Checkbox),
        "url" => Some(ColumnType::Url),
        "email" => Some(ColumnType::Email),
        "formula" => Some(ColumnType::Formula),
        "rollup" => Some(ColumnType::Rollup),
        "lookup" => Some(ColumnType::Lookup),
        "created_time" | "computed_time" => Some(ColumnType::CreatedTime),
        "created_by" | "computed_by" => Some(ColumnType::CreatedBy),
        "last_edited_time" => Some(ColumnType::LastEditedTime),
        "last_edited_by" => Some(ColumnType::LastEditedBy),
        _ => None,
    }
}

/// Aggregation family computed for a column in query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Numeric,
    Distribution,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Numeric => "numeric",
            AggregationType::Distribution => "distribution",
        }
    }
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Currency => "currency",
            ColumnType::Date => "date",
            ColumnType::Select => "select",
            ColumnType::MultiSelect => "multi_select",
            ColumnType::Checkbox => "checkbox",
            ColumnType::Url => "url",
            ColumnType::Email => "email",
            ColumnType::Formula => "formula",
            ColumnType::Rollup => "rollup",
            ColumnType::Lookup => "lookup",
            ColumnType::CreatedTime => "created_time",
            ColumnType::CreatedBy => "created_by",
            ColumnType::LastEditedTime => "last_edited_time",
            ColumnType::LastEditedBy => "last_edited_by",
        }
    }

    /// Derived columns live in `computed_data` and are produced by the formula evaluator.
    pub fn is_derived(&self) -> bool {
        match self {
            ColumnType::Formula | ColumnType::Rollup | ColumnType::Lookup => true,
            ColumnType::Text
            | ColumnType::Number
            | ColumnType::Currency
            | ColumnType::Date
            | ColumnType::Select
            | ColumnType::MultiSelect
            | ColumnType::Checkbox
            | ColumnType::Url
            | ColumnType::Email
            | ColumnType::CreatedTime
            | ColumnType::CreatedBy
            | ColumnType::LastEditedTime
            | ColumnType::LastEditedBy => false,
        }
    }

    /// System columns are filled by the engine from the clock and the acting user.
    pub fn is_system(&self) -> bool {
        match self {
            ColumnType::CreatedTime
            | ColumnType::CreatedBy
            | ColumnType::LastEditedTime
            | ColumnType::LastEditedBy => true,
            ColumnType::Text
            | ColumnType::Number
            | ColumnType::Currency
            | ColumnType::Date
            | ColumnType::Select
            | ColumnType::MultiSelect
            | ColumnType::Checkbox
            | ColumnType::Url
            | ColumnType::Email
            | ColumnType::Formula
            | ColumnType::Rollup
            | ColumnType::Lookup => false,
        }
    }

    /// Clients may only write columns that are neither derived nor system-maintained.
    pub fn is_writable(&self) -> bool {
        !self.is_derived() && !self.is_system()
    }

    /// Columns matched by free-text search.
    pub fn is_searchable(&self) -> bool {
        match self {
            ColumnType::Text | ColumnType::Url | ColumnType::Email | ColumnType::Select => true,
            ColumnType::Number
            | ColumnType::Currency
            | ColumnType::Date
            | ColumnType::MultiSelect
            | ColumnType::Checkbox
            | ColumnType::Formula
            | ColumnType::Rollup
            | ColumnType::Lookup
            | ColumnType::CreatedTime
            | ColumnType::CreatedBy
            | ColumnType::LastEditedTime
            | ColumnType::LastEditedBy => false,
        }
    }

    pub fn aggregation(&self) -> Option<AggregationType> {
        match self {
            ColumnType::Number | ColumnType::Currency => Some(AggregationType::Numeric),
            ColumnType::Select => Some(AggregationType::Distribution),
            ColumnType::Text
            | ColumnType::Date
            | ColumnType::MultiSelect
            | ColumnType::Checkbox
            | ColumnType::Url
            | ColumnType::Email
            | ColumnType::Formula
            | ColumnType::Rollup
            | ColumnType::Lookup
            | ColumnType::CreatedTime
            | ColumnType::CreatedBy
            | ColumnType::LastEditedTime
            | ColumnType::LastEditedBy => None,
        }
    }

    /// Value stored for a column the caller left out and that has no default.
    pub fn zero_value(&self) -> Value {
        match self {
            ColumnType::Text | ColumnType::Url | ColumnType::Email => Value::String(String::new()),
            ColumnType::Number | ColumnType::Currency => Value::from(0),
            ColumnType::Checkbox => Value::Bool(false),
            ColumnType::MultiSelect => Value::Array(Vec::new()),
            ColumnType::Date
            | ColumnType::Select
            | ColumnType::Formula
            | ColumnType::Rollup
            | ColumnType::Lookup
            | ColumnType::CreatedTime
            | ColumnType::CreatedBy
            | ColumnType::LastEditedTime
            | ColumnType::LastEditedBy => Value::Null,
        }
    }

    /// Checks that `value` conforms to this type. `null` is always conformant;
    /// required-ness is checked separately.
    pub fn check_value(&self, value: &Value, options: &[String]) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            ColumnType::Text | ColumnType::CreatedBy | ColumnType::LastEditedBy => {
                expect_string(value).map(|_| ())
            }
            ColumnType::Url => {
                let s = expect_string(value)?;
                if s.is_empty() || s.contains("://") {
                    Ok(())
                } else {
                    Err(format!("'{}' is not a URL", s))
                }
            }
            ColumnType::Email => {
                let s = expect_string(value)?;
                if s.is_empty() || s.split_once('@').is_some_and(|(u, d)| !u.is_empty() && !d.is_empty()) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not an email address", s))
                }
            }
            ColumnType::Number | ColumnType::Currency => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("expected a number, got {}", value))
                }
            }
            ColumnType::Checkbox => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected true or false, got {}", value))
                }
            }
            ColumnType::Date | ColumnType::CreatedTime | ColumnType::LastEditedTime => {
                let s = expect_string(value)?;
                if s.is_empty() || is_date(s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not an ISO-8601 date", s))
                }
            }
            ColumnType::Select => {
                let s = expect_string(value)?;
                check_option(s, options)
            }
            ColumnType::MultiSelect => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected a list of options, got {}", value))?;
                for item in items {
                    check_option(expect_string(item)?, options)?;
                }
                Ok(())
            }
            // Derived values are produced by the evaluator, any JSON value is accepted.
            ColumnType::Formula | ColumnType::Rollup | ColumnType::Lookup => Ok(()),
        }
    }
}

/// Empty means absent for required checks: `null`, `""` or `[]`.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn expect_string(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected text, got {}", value))
}

fn check_option(value: &str, options: &[String]) -> Result<(), String> {
    if options.is_empty() || value.is_empty() || options.iter().any(|o| o == value) {
        Ok(())
    } else {
        Err(format!("'{}' is not one of the column options", value))
    }
}

fn is_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
