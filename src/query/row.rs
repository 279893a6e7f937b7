//! Generic result rows for projection queries

use crate::value::Value;
use crate::{Error, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::ops::Index;
use std::sync::Arc;

/// One result row. Values are reachable by position or by result-column
/// name (the alias when one was given).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Result column names in projection order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Value at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the first column called `name`
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| &self.values[i])
    }

    /// Like [`Row::get_by_name`], failing with a usage error when absent
    pub fn field(&self, name: &str) -> Result<&Value> {
        self.get_by_name(name).ok_or_else(|| {
            Error::Usage(format!(
                "row has no column {:?} (columns: {})",
                name,
                self.columns.join(", ")
            ))
        })
    }

    /// (column, value) pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// (column, value) pairs in projection order, duplicates kept
    pub fn to_map(&self) -> Vec<(String, Value)> {
        self.iter()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .collect()
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get_by_name(name) {
            Some(value) => value,
            None => panic!("row has no column {:?}", name),
        }
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let columns: Arc<[String]> = vec!["minimum_age".to_string(), "max(age)".to_string()].into();
        Row::new(columns, vec![Value::Integer(10), Value::Integer(99)])
    }

    #[test]
    fn test_positional_and_named_access() {
        let row = sample();
        assert_eq!(row.len(), 2);
        assert_eq!(row[0], Value::Integer(10));
        assert_eq!(row.get(1), Some(&Value::Integer(99)));
        assert_eq!(row["minimum_age"], Value::Integer(10));
        assert_eq!(row.field("max(age)").unwrap(), &Value::Integer(99));
        assert!(row.get(2).is_none());
    }

    #[test]
    fn test_missing_column_is_an_error() {
        assert!(matches!(sample().field("baz"), Err(Error::Usage(_))));
    }

    #[test]
    #[should_panic]
    fn test_index_by_missing_name_panics() {
        let _ = &sample()["baz"];
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, r#"{"minimum_age":10,"max(age)":99}"#);
    }

    #[test]
    fn test_to_map_keeps_projection_order() {
        let columns: Arc<[String]> =
            vec!["zeta".to_string(), "alpha".to_string(), "mid".to_string(), "alpha".to_string()].into();
        let row = Row::new(
            columns,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)],
        );
        let map = row.to_map();
        let names: Vec<&str> = map.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid", "alpha"]);
        assert_eq!(map[3].1, Value::Integer(4));
    }
}
