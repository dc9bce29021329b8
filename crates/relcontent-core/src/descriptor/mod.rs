//! Content descriptors.
//!
//! A [`ContentDescriptor`] is the deduplicated tree of display fields for a
//! rule set and a set of row types. Fields live in an arena addressed by
//! [`FieldId`]; every field has a stable unique name used as the key of its
//! values in content records.
//!
//! Descriptors are built by [`DescriptorBuilder`] and are immutable once
//! built, so they can be shared through the [`DescriptorCache`].

mod builder;
mod cache;
mod category;
mod field;
mod naming;

pub use builder::DescriptorBuilder;
pub use cache::{CacheStats, DescriptorCache, DescriptorFingerprint};
pub use category::{Category, CategoryTree, DEFAULT_CATEGORY_ID};
pub use field::{
    path_signature, ContentClass, Field, FieldId, FieldKind, FieldStep, NestedContentField,
    PropertiesField, PropertyPair,
};

use crate::error::Error;
use relcontent_proto::{InstanceKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Input of a descriptor build.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescriptorRequest {
    /// Concrete types of the requested instances.
    pub root_types: BTreeSet<String>,
    /// Rule set variable bindings.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Requested instances. When set and a provider is available, related
    /// content is narrowed to types actually related to these instances.
    #[serde(default)]
    pub scope: Option<Vec<InstanceKey>>,
    #[serde(default)]
    pub flags: ContentFlags,
}

impl DescriptorRequest {
    /// Request for a set of root types.
    pub fn new<I, S>(root_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root_types: root_types.into_iter().map(Into::into).collect(),
            variables: BTreeMap::new(),
            scope: None,
            flags: ContentFlags::default(),
        }
    }

    /// Request scoped to concrete instances. Root types are their classes.
    pub fn for_instances(instances: &[InstanceKey]) -> Self {
        Self {
            root_types: instances.iter().map(|k| k.class.clone()).collect(),
            variables: BTreeMap::new(),
            scope: Some(instances.to_vec()),
            flags: ContentFlags::default(),
        }
    }

    /// Bind a rule set variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Set the content flags.
    pub fn with_flags(mut self, flags: ContentFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Request flags that shape the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentFlags {
    /// Only the keys of the rows are wanted.
    #[serde(default)]
    pub keys_only: bool,
    /// The descriptor carries no fields.
    #[serde(default)]
    pub no_fields: bool,
}

impl ContentFlags {
    pub const KEYS_ONLY: Self = Self {
        keys_only: true,
        no_fields: false,
    };

    pub const NO_FIELDS: Self = Self {
        keys_only: false,
        no_fields: true,
    };

    /// Whether a descriptor built with these flags has fields. Records of
    /// a fieldless descriptor carry primary keys only.
    pub fn creates_fields(&self) -> bool {
        !self.keys_only && !self.no_fields
    }
}

/// Where the rows of a descriptor's records come from.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowSource {
    /// The requested instances themselves.
    #[default]
    Requested,
    /// Instances reached from the requested instances through `steps`.
    Related { steps: Vec<FieldStep> },
    /// Every instance of the row types, whatever was requested.
    Classes,
}

/// A specification that could not contribute to a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Short description of the offending specification.
    pub spec: Option<String>,
    pub error: Error,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            Some(spec) => write!(f, "{}: {}", spec, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// A best-effort descriptor and the problems met while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorBuild {
    pub descriptor: ContentDescriptor,
    pub diagnostics: Vec<Diagnostic>,
}

impl DescriptorBuild {
    /// Check that every specification contributed.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// The field tree for one (rule set, row types, variables) combination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentDescriptor {
    ruleset_id: String,
    row_types: BTreeSet<String>,
    rows: RowSource,
    flags: ContentFlags,
    fields: Vec<Field>,
    roots: Vec<FieldId>,
    categories: CategoryTree,
}

impl ContentDescriptor {
    pub(crate) fn new(
        ruleset_id: String,
        row_types: BTreeSet<String>,
        rows: RowSource,
        flags: ContentFlags,
        fields: Vec<Field>,
        roots: Vec<FieldId>,
        categories: CategoryTree,
    ) -> Self {
        Self {
            ruleset_id,
            row_types,
            rows,
            flags,
            fields,
            roots,
            categories,
        }
    }

    /// A descriptor without rows or fields.
    pub(crate) fn empty(ruleset_id: String, default_category_label: String, flags: ContentFlags) -> Self {
        Self::new(
            ruleset_id,
            BTreeSet::new(),
            RowSource::Requested,
            flags,
            Vec::new(),
            Vec::new(),
            CategoryTree::with_default(default_category_label),
        )
    }

    /// Id of the rule set the descriptor was built from.
    pub fn ruleset_id(&self) -> &str {
        &self.ruleset_id
    }

    /// Concrete types of the rows.
    pub fn row_types(&self) -> &BTreeSet<String> {
        &self.row_types
    }

    /// Where the rows come from.
    pub fn row_source(&self) -> &RowSource {
        &self.rows
    }

    /// Path from requested instances to rows, for related-instances content.
    pub fn selection(&self) -> Option<&[FieldStep]> {
        match &self.rows {
            RowSource::Related { steps } => Some(steps),
            RowSource::Requested | RowSource::Classes => None,
        }
    }

    /// Flags the descriptor was built with.
    pub fn flags(&self) -> ContentFlags {
        self.flags
    }

    /// Top-level fields in display order.
    pub fn roots(&self) -> &[FieldId] {
        &self.roots
    }

    /// Get a field.
    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id.0)
    }

    /// Find a field by unique name.
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All fields, parents before children.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the descriptor has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Category tree.
    pub fn categories(&self) -> &CategoryTree {
        &self.categories
    }

    /// Unique names of all fields, in arena order.
    pub fn unique_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}
