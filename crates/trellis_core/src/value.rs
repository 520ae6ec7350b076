//! Values carried by records.

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque host object carried through a record.
///
/// Extensions are shared, not copied: every reader sees the same instance.
/// They render to JSON when a record is serialized.
pub trait Extension: Any + Send + Sync + fmt::Debug {
    /// JSON rendering of the current state
    fn to_json(&self) -> serde_json::Value;

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;
}

/// A value bound to a key in a record
#[derive(Debug, Clone)]
pub enum Value {
    /// Plain data
    Json(serde_json::Value),
    /// Structured output with named fields
    Record(Record),
    /// Shared host object
    Extension(Arc<dyn Extension>),
}

impl Value {
    /// JSON null
    #[must_use]
    pub const fn null() -> Self {
        Self::Json(serde_json::Value::Null)
    }

    /// Wrap a shared extension object
    #[must_use]
    pub fn extension<E: Extension>(ext: Arc<E>) -> Self {
        Self::Extension(ext)
    }

    /// Get as f64 if numeric
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    /// Get as i64 if integral
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    /// Get as bool
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }

    /// Get as JSON array
    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<serde_json::Value>> {
        match self {
            Self::Json(v) => v.as_array(),
            _ => None,
        }
    }

    /// Get as nested record
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Downcast an extension to its concrete type
    #[must_use]
    pub fn downcast_ref<T: Extension>(&self) -> Option<&T> {
        match self {
            Self::Extension(ext) => ext.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Whether this value has named fields (record or JSON object)
    #[must_use]
    pub fn is_structured(&self) -> bool {
        match self {
            Self::Record(_) => true,
            Self::Json(v) => v.is_object(),
            Self::Extension(_) => false,
        }
    }

    /// Look up a named field of a structured value
    #[must_use]
    pub fn field(&self, key: &str) -> Option<Value> {
        match self {
            Self::Record(r) => r.get(key).cloned(),
            Self::Json(serde_json::Value::Object(map)) => map.get(key).cloned().map(Self::Json),
            _ => None,
        }
    }

    /// Return a copy of this structured value with a field set
    ///
    /// # Errors
    ///
    /// Returns error if the value has no named fields
    pub fn with_field(&self, key: &str, field: Value) -> CoreResult<Value> {
        match self {
            Self::Record(r) => {
                let mut r = r.clone();
                r.insert(key, field);
                Ok(Self::Record(r))
            }
            Self::Json(serde_json::Value::Object(map)) => {
                let mut map = map.clone();
                map.insert(key.to_string(), field.to_json());
                Ok(Self::Json(serde_json::Value::Object(map)))
            }
            _ => Err(CoreError::schema(key, "value has no named fields")),
        }
    }

    /// Render as JSON
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Record(r) => r.to_json(),
            Self::Extension(ext) => ext.to_json(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Extension(a), Self::Extension(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(v) => v.serialize(serializer),
            Self::Record(r) => r.serialize(serializer),
            Self::Extension(ext) => ext.to_json().serialize(serializer),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

macro_rules! json_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Json(serde_json::Value::from(v))
                }
            }
        )*
    };
}

json_from!(bool, i32, i64, u32, u64, usize, f64, &str, String);
