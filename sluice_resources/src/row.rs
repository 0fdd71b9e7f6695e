//! Rows appended to a channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{NotAnObjectSnafu, RowError, json_type_name};

/// A row is a map from column name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the row with the column set to the given value.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(column.into(), value.into())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Approximate size of the row once encoded, in bytes.
    ///
    /// The batcher uses this to bound the size of the batches it uploads.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(&self.0)
            .map(|encoded| encoded.len())
            .unwrap_or_default()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Row {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl TryFrom<Value> for Row {
    type Error = RowError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => NotAnObjectSnafu {
                actual: json_type_name(&other),
            }
            .fail(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_row_builder() {
        let row = Row::new().with("c1", 1).with("c2", "1").with("ts", 1.5);

        assert_eq!(row.len(), 3);
        assert_eq!(row.get("c1"), Some(&json!(1)));
        assert_eq!(row.get("c2"), Some(&json!("1")));
        assert_eq!(row.encoded_size(), r#"{"c1":1,"c2":"1","ts":1.5}"#.len());
    }

    #[test]
    fn test_row_from_json() {
        let row = Row::try_from(json!({"c1": 1})).unwrap();
        assert_eq!(row.get("c1"), Some(&json!(1)));

        let err = Row::try_from(json!([1, 2])).unwrap_err();
        assert_eq!(err, RowError::NotAnObject { actual: "array" });
    }
}
