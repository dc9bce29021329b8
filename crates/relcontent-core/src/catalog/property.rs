//! Property definitions for entity and relationship types.

use super::types::ScalarType;
use serde::{Deserialize, Serialize};

/// A property declared on an entity type or relationship type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name (unique within the declaring type).
    pub name: String,
    /// Value type.
    #[serde(default)]
    pub value_type: ScalarType,
    /// Display label. Defaults to the property name.
    #[serde(default)]
    pub label: Option<String>,
    /// Category reference.
    #[serde(default)]
    pub category: Option<String>,
    /// Display priority.
    #[serde(default)]
    pub priority: i32,
    /// Hidden properties are excluded from wildcard selection.
    #[serde(default)]
    pub hidden: bool,
}

impl PropertyDef {
    /// Create a new property.
    pub fn new(name: impl Into<String>, value_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            value_type,
            label: None,
            category: None,
            priority: 0,
            hidden: false,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the category reference.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the display priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the property hidden.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Label shown for this property.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// A property together with the type that declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProperty {
    /// Entity or relationship type declaring the property.
    pub declaring_type: String,
    /// Property definition.
    pub def: PropertyDef,
}

impl ResolvedProperty {
    /// Property name.
    pub fn name(&self) -> &str {
        &self.def.name
    }
}
