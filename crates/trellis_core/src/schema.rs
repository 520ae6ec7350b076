//! Record schemas.
//!
//! A schema maps each key to exactly one of: required, optional with a
//! default, or nested (a required key whose value has named sub-keys).
//! Input schemas say what a node reads; output schemas say what fields the
//! value a node produces carries.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::record::{Record, type_error};
use crate::value::Value;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Schema entry for one key
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Key must be present
    Required,
    /// Key may be absent; the default is used instead
    Optional(Value),
    /// Key must be present and carry the nested keys
    Nested(Schema),
}

impl Entry {
    /// Whether the key must be present
    #[must_use]
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::Optional(_))
    }

    /// Combine two requirements on the same key.
    ///
    /// Nested wins over flat entries (and nested schemas merge), required
    /// wins over optional, and two optionals keep the first default.
    #[must_use]
    pub fn merge(self, other: &Entry) -> Entry {
        match (self, other) {
            (Self::Nested(mut a), Self::Nested(b)) => {
                a.merge_inputs(b, |_| false);
                Self::Nested(a)
            }
            (Self::Nested(a), _) => Self::Nested(a),
            (_, Self::Nested(b)) => Self::Nested(b.clone()),
            (Self::Required, _) | (_, Self::Required) => Self::Required,
            (Self::Optional(d), Self::Optional(_)) => Self::Optional(d),
        }
    }
}

/// Ordered mapping from keys to schema entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    entries: IndexMap<Key, Entry>,
}

impl Schema {
    /// Create an empty schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required key
    #[must_use]
    pub fn required(mut self, key: impl Into<Key>) -> Self {
        self.entries.insert(key.into(), Entry::Required);
        self
    }

    /// Add an optional key with a default
    #[must_use]
    pub fn optional(mut self, key: impl Into<Key>, default: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), Entry::Optional(default.into()));
        self
    }

    /// Add a nested key
    #[must_use]
    pub fn nested(mut self, key: impl Into<Key>, schema: Schema) -> Self {
        self.entries.insert(key.into(), Entry::Nested(schema));
        self
    }

    /// Set the entry for a key, replacing any previous one
    pub fn insert(&mut self, key: impl Into<Key>, entry: Entry) -> Option<Entry> {
        self.entries.insert(key.into(), entry)
    }

    /// Get the entry for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Check if a key is described
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Check if a key is required (or nested)
    #[must_use]
    pub fn is_required(&self, key: &str) -> bool {
        self.get(key).is_some_and(Entry::is_required)
    }

    /// Iterate over keys in order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    /// Iterate over entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Entry)> {
        self.entries.iter()
    }

    /// Keys that must be present
    pub fn required_keys(&self) -> impl Iterator<Item = &Key> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_required())
            .map(|(k, _)| k)
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold a node's input requirements into this composite requirement,
    /// skipping keys for which `produced` holds (internal wiring).
    pub fn merge_inputs(&mut self, node_input: &Schema, produced: impl Fn(&Key) -> bool) {
        for (key, entry) in &node_input.entries {
            if produced(key) {
                continue;
            }
            match self.entries.get_mut(key) {
                Some(existing) => {
                    let current = std::mem::replace(existing, Entry::Required);
                    *existing = current.merge(entry);
                }
                None => {
                    self.entries.insert(key.clone(), entry.clone());
                }
            }
        }
    }

    /// Union of output schemas; later entries for the same key merge into
    /// earlier ones.
    #[must_use]
    pub fn merge_outputs<'a>(outputs: impl IntoIterator<Item = (&'a Key, &'a Entry)>) -> Schema {
        let mut merged = Schema::new();
        for (key, entry) in outputs {
            let entry = match merged.entries.get(key) {
                Some(existing) => existing.clone().merge(entry),
                None => entry.clone(),
            };
            merged.entries.insert(key.clone(), entry);
        }
        merged
    }

    /// Schema subtraction
    #[must_use]
    pub fn without<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> Schema {
        let mut out = self.clone();
        for key in keys {
            out.entries.shift_remove(key);
        }
        out
    }

    /// Check that every required or nested key of `reference` appears in
    /// this schema, recursively. Optional sub-keys may be absent.
    ///
    /// # Errors
    ///
    /// Returns the dotted path of the first key that does not resolve
    pub fn resolve(&self, reference: &Schema) -> Result<(), String> {
        for (key, wanted) in &reference.entries {
            let found = self.entries.get(key);
            match (wanted, found) {
                (Entry::Optional(_), _) => {}
                (Entry::Required, Some(_)) => {}
                (Entry::Nested(sub), Some(Entry::Nested(have))) => {
                    have.resolve(sub).map_err(|p| format!("{key}.{p}"))?;
                }
                _ => return Err(key.to_string()),
            }
        }
        Ok(())
    }

    /// Check a record against this schema
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` for the first absent required key
    pub fn check(&self, record: &Record) -> CoreResult<()> {
        self.select(|k| record.get(k.as_str()).cloned()).map(|_| ())
    }

    /// Extract the inputs this schema describes.
    ///
    /// Required keys must resolve through `lookup`, optional keys fall back to
    /// their default, nested keys are checked recursively and nested defaults
    /// are filled into the sub-value.
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` with the dotted path of the first absent key, or
    /// `NodeExecution` if a nested key holds a value without named fields
    pub fn select(&self, lookup: impl Fn(&Key) -> Option<Value>) -> CoreResult<Record> {
        let mut out = Record::new();
        for (key, entry) in &self.entries {
            let value = match (entry, lookup(key)) {
                (Entry::Optional(default), None) => default.clone(),
                (_, None) => return Err(CoreError::missing(key.as_str())),
                (Entry::Nested(sub), Some(v)) => sub.fill_nested(key.as_str(), v)?,
                (_, Some(v)) => v,
            };
            out.insert(key.clone(), value);
        }
        Ok(out)
    }

    fn fill_nested(&self, path: &str, mut value: Value) -> CoreResult<Value> {
        if !value.is_structured() {
            return Err(type_error(path, "record"));
        }
        for (key, entry) in &self.entries {
            let at = format!("{path}.{key}");
            let filled = match (entry, value.field(key.as_str())) {
                (Entry::Optional(default), None) => default.clone(),
                (_, None) => return Err(CoreError::missing(at)),
                (Entry::Nested(sub), Some(v)) => sub.fill_nested(&at, v)?,
                (_, Some(_)) => continue,
            };
            value = value.with_field(key.as_str(), filled)?;
        }
        Ok(value)
    }

    /// Whether every key is valid, recursively
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.entries.iter().all(|(k, e)| {
            k.is_valid()
                && match e {
                    Entry::Nested(sub) => sub.is_well_formed(),
                    _ => true,
                }
        })
    }

    /// Render in `true` / `{"optional": default}` / nested-map notation
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Required => serializer.serialize_bool(true),
            Self::Optional(default) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("optional", default)?;
                map.end()
            }
            Self::Nested(schema) => schema.serialize(serializer),
        }
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, e) in &self.entries {
            map.serialize_entry(k, e)?;
        }
        map.end()
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = (&'a Key, &'a Entry);
    type IntoIter = indexmap::map::Iter<'a, Key, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
