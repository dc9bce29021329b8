//! Content record types.
//!
//! A [`ContentRecord`] is the per-instance (or per-merged-group) realization
//! of a content descriptor. Its `values` tree maps field unique names to
//! scalars, single nested items or arrays of nested items. `displayValues` is
//! the parallel tree of human-readable strings; nested items carry their own
//! display maps.

use crate::key::InstanceKey;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Value of one field inside a record or nested item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    /// A scalar property value (or null).
    Scalar(Value),
    /// Related content with to-many multiplicity.
    Array(Vec<NestedItem>),
    /// Related content with to-one multiplicity.
    Struct(NestedItem),
}

impl Default for RecordValue {
    fn default() -> Self {
        RecordValue::Scalar(Value::Null)
    }
}

impl RecordValue {
    /// The null value.
    pub fn null() -> Self {
        RecordValue::Scalar(Value::Null)
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, RecordValue::Scalar(Value::Null))
    }

    /// Get the scalar, if this is one.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            RecordValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Nested items held by this value. A struct yields one item, a scalar
    /// none.
    pub fn items(&self) -> &[NestedItem] {
        match self {
            RecordValue::Array(items) => items,
            RecordValue::Struct(item) => std::slice::from_ref(item),
            RecordValue::Scalar(_) => &[],
        }
    }
}

impl From<Value> for RecordValue {
    fn from(v: Value) -> Self {
        RecordValue::Scalar(v)
    }
}

/// Display form of one field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayValue {
    /// No display string.
    #[default]
    Null,
    /// Display string.
    Text(String),
}

impl DisplayValue {
    /// Get the display string, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DisplayValue::Null => None,
            DisplayValue::Text(s) => Some(s),
        }
    }

    /// Display form of a scalar value.
    pub fn of(value: &Value) -> Self {
        match value.to_display() {
            Some(s) => DisplayValue::Text(s),
            None => DisplayValue::Null,
        }
    }
}

/// One related instance (or merged group of them) inside a nested field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedItem {
    /// Keys of the instances this item was built from.
    pub primary_keys: Vec<InstanceKey>,
    /// Field values keyed by field unique name.
    pub values: BTreeMap<String, RecordValue>,
    /// Display values keyed by field unique name.
    pub display_values: BTreeMap<String, DisplayValue>,
    /// Field names whose values were collapsed by merging.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub merged_field_names: BTreeSet<String>,
}

impl NestedItem {
    /// Create an empty item for an instance.
    pub fn new(key: InstanceKey) -> Self {
        Self {
            primary_keys: vec![key],
            ..Default::default()
        }
    }

    /// Set a field value and its display form.
    pub fn insert(&mut self, name: impl Into<String>, value: RecordValue, display: DisplayValue) {
        let name = name.into();
        self.display_values.insert(name.clone(), display);
        self.values.insert(name, value);
    }

    /// Get a field value.
    pub fn value(&self, name: &str) -> Option<&RecordValue> {
        self.values.get(name)
    }

    /// Get a field display value.
    pub fn display(&self, name: &str) -> Option<&DisplayValue> {
        self.display_values.get(name)
    }
}

/// Error attached to a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    /// The instance provider failed for a batch containing this record.
    #[error("traversal failure{}: {message}", field_suffix(.field))]
    TraversalFailure {
        /// Unique name of the affected field.
        field: Option<String>,
        message: String,
    },

    /// A recursive step exceeded the hop limit.
    #[error("recursion overflow{} from {origin} after {max_hops} hops", field_suffix(.field))]
    RecursionOverflow {
        field: Option<String>,
        origin: InstanceKey,
        max_hops: u32,
    },
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(f) => format!(" in field {}", f),
        None => String::new(),
    }
}

/// A content record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    /// Keys of the primary instances (several when merged).
    pub primary_keys: Vec<InstanceKey>,
    /// Top-level field values keyed by field unique name.
    pub values: BTreeMap<String, RecordValue>,
    /// Display values keyed by field unique name.
    pub display_values: BTreeMap<String, DisplayValue>,
    /// Field names whose values were collapsed by merging.
    pub merged_field_names: BTreeSet<String>,
    /// Errors encountered while building this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RecordError>,
}

impl ContentRecord {
    /// Create an empty record for a primary instance.
    pub fn new(key: InstanceKey) -> Self {
        Self {
            primary_keys: vec![key],
            ..Default::default()
        }
    }

    /// Set a field value and its display form.
    pub fn insert(&mut self, name: impl Into<String>, value: RecordValue, display: DisplayValue) {
        let name = name.into();
        self.display_values.insert(name.clone(), display);
        self.values.insert(name, value);
    }

    /// Get a field value.
    pub fn value(&self, name: &str) -> Option<&RecordValue> {
        self.values.get(name)
    }

    /// Get a field display value.
    pub fn display(&self, name: &str) -> Option<&DisplayValue> {
        self.display_values.get(name)
    }

    /// Check whether a field was collapsed by merging.
    pub fn is_merged(&self, name: &str) -> bool {
        self.merged_field_names.contains(name)
    }

    /// Check if any error was attached.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, crate::Error> {
        Ok(serde_json::to_string(self)?)
    }
}
