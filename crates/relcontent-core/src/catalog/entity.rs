//! Entity type definitions.

use super::property::PropertyDef;
use serde::{Deserialize, Serialize};

/// An entity type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    /// Type name (unique within schema).
    pub name: String,
    /// Display label. Defaults to the type name.
    #[serde(default)]
    pub label: Option<String>,
    /// Direct base types.
    #[serde(default)]
    pub base_types: Vec<String>,
    /// Declared properties, in declaration order.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    /// Abstract types have no instances of their own.
    #[serde(default)]
    pub is_abstract: bool,
    /// Hidden types are excluded from wildcard target expansion.
    #[serde(default)]
    pub hidden: bool,
}

impl EntityTypeDef {
    /// Create a new entity type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            base_types: Vec::new(),
            properties: Vec::new(),
            is_abstract: false,
            hidden: false,
        }
    }

    /// Add a base type.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_types.push(base.into());
        self
    }

    /// Add a property.
    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Add multiple properties.
    pub fn with_properties(mut self, properties: impl IntoIterator<Item = PropertyDef>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Mark the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark the type hidden.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Get a declared property by name.
    pub fn get_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Label shown for this type.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}
