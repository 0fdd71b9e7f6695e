//! Pipe schemas and row validation.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::Snafu;

use crate::row::Row;

/// Reasons a row does not match the schema of its pipe.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum RowError {
    #[snafu(display("row must be a JSON object, got {actual}"))]
    NotAnObject { actual: &'static str },
    #[snafu(display("unknown column {column}"))]
    UnknownColumn { column: String },
    #[snafu(display("column {column} appears more than once"))]
    DuplicateColumn { column: String },
    #[snafu(display("missing value for non-nullable column {column}"))]
    MissingColumn { column: String },
    #[snafu(display("null value for non-nullable column {column}"))]
    NullValue { column: String },
    #[snafu(display("column {column} expects {expected}, got {actual}"))]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: &'static str,
    },
    #[snafu(display("column {column} has an invalid timestamp: {value}"))]
    InvalidTimestamp { column: String, value: String },
}

/// The data type of a pipe column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    /// RFC 3339 string or seconds since the Unix epoch.
    Timestamp,
    /// Any JSON value.
    Variant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

/// The columns accepted by a pipe, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeSchema {
    pub columns: Vec<ColumnSchema>,
}

impl ColumnSchema {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn validate_value(&self, value: &Value) -> Result<(), RowError> {
        let matches = match (self.data_type, value) {
            (_, Value::Null) => {
                if self.nullable {
                    return Ok(());
                }

                return NullValueSnafu {
                    column: self.name.clone(),
                }
                .fail();
            }
            (ColumnType::Variant, _) => true,
            (ColumnType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ColumnType::Float, Value::Number(_)) => true,
            (ColumnType::Text, Value::String(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Timestamp, Value::Number(_)) => true,
            (ColumnType::Timestamp, Value::String(s)) => {
                if !is_valid_timestamp(s) {
                    return InvalidTimestampSnafu {
                        column: self.name.clone(),
                        value: s.clone(),
                    }
                    .fail();
                }
                true
            }
            _ => false,
        };

        if !matches {
            return TypeMismatchSnafu {
                column: self.name.clone(),
                expected: self.data_type,
                actual: json_type_name(value),
            }
            .fail();
        }

        Ok(())
    }
}

impl PipeSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    /// Looks up a column by name, ignoring ASCII case.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Checks that the row can be ingested into a pipe with this schema.
    pub fn validate_row(&self, row: &Row) -> Result<(), RowError> {
        let mut seen = HashSet::with_capacity(row.len());

        for (name, value) in row.iter() {
            let Some(column) = self.column(name) else {
                return UnknownColumnSnafu {
                    column: name.clone(),
                }
                .fail();
            };

            if !seen.insert(column.name.as_str()) {
                return DuplicateColumnSnafu {
                    column: column.name.clone(),
                }
                .fail();
            }

            column.validate_value(value)?;
        }

        if let Some(missing) = self
            .columns
            .iter()
            .find(|column| !column.nullable && !seen.contains(column.name.as_str()))
        {
            return MissingColumnSnafu {
                column: missing.name.clone(),
            }
            .fail();
        }

        Ok(())
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Variant => "variant",
        };
        f.write_str(name)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_valid_timestamp(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

fn default_nullable() -> bool {
    true
}
