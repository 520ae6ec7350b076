//! Input and output records.
//!
//! A record is the single calling convention shared by every node function:
//! leaves, compiled graphs and wrapped nodes all take a record and return a
//! value (compiled graphs return a record).

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::value::Value;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Ordered mapping from keys to values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(IndexMap<Key, Value>);

impl Record {
    /// Create an empty record
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Get a value by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Remove a value by key, preserving the order of the rest
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Check if a key is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over keys in order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.0.keys()
    }

    /// Iterate over entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy without one key
    #[must_use]
    pub fn without(&self, key: &str) -> Self {
        let mut copy = self.clone();
        copy.remove(key);
        copy
    }

    /// Get a value that must be present
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if absent
    pub fn require(&self, key: &str) -> CoreResult<&Value> {
        self.get(key).ok_or_else(|| CoreError::missing(key))
    }

    /// Get a numeric value as f64
    ///
    /// # Errors
    ///
    /// Returns error if absent or not numeric
    pub fn f64(&self, key: &str) -> CoreResult<f64> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| type_error(key, "number"))
    }

    /// Get an integral value as i64
    ///
    /// # Errors
    ///
    /// Returns error if absent or not an integer
    pub fn i64(&self, key: &str) -> CoreResult<i64> {
        self.require(key)?
            .as_i64()
            .ok_or_else(|| type_error(key, "integer"))
    }

    /// Get a string value
    ///
    /// # Errors
    ///
    /// Returns error if absent or not a string
    pub fn str(&self, key: &str) -> CoreResult<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| type_error(key, "string"))
    }

    /// Get an array of numbers as f64
    ///
    /// # Errors
    ///
    /// Returns error if absent, not an array, or holding non-numbers
    pub fn f64s(&self, key: &str) -> CoreResult<Vec<f64>> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| type_error(key, "array"))?
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| type_error(key, "array of numbers")))
            .collect()
    }

    /// Get a nested record
    ///
    /// # Errors
    ///
    /// Returns error if absent or not a record
    pub fn record(&self, key: &str) -> CoreResult<&Record> {
        self.require(key)?
            .as_record()
            .ok_or_else(|| type_error(key, "record"))
    }

    /// Build a record from a JSON object
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is not an object
    pub fn from_json(json: serde_json::Value) -> CoreResult<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (Key::from(k), Value::Json(v)))
                .collect()),
            other => Err(CoreError::schema(
                "record",
                format!("expected a JSON object, got {other}"),
            )),
        }
    }

    /// Render as a JSON object
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_json()))
                .collect(),
        )
    }
}

pub(crate) fn type_error(key: &str, expected: &str) -> CoreError {
    CoreError::failed(format!("value at `{key}` is not a {expected}"))
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<K: Into<Key>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Record {
    type Item = (Key, Value);
    type IntoIter = indexmap::map::IntoIter<Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a Key, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Extend<(Key, Value)> for Record {
    fn extend<I: IntoIterator<Item = (Key, Value)>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}
