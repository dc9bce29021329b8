//! Relationship type definitions.

use super::property::PropertyDef;
use super::types::{Direction, Multiplicity};
use serde::{Deserialize, Serialize};

/// One end of a relationship type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDef {
    /// Constraint types for this end.
    #[serde(default)]
    pub types: Vec<String>,
    /// Whether types derived from the constraint types are accepted.
    #[serde(default = "default_polymorphic")]
    pub polymorphic: bool,
    /// How many instances may sit at this end per instance at the other end.
    #[serde(default)]
    pub multiplicity: Multiplicity,
}

fn default_polymorphic() -> bool {
    true
}

impl EndpointDef {
    /// Create a polymorphic endpoint constrained to one type.
    pub fn new(ty: impl Into<String>, multiplicity: Multiplicity) -> Self {
        Self {
            types: vec![ty.into()],
            polymorphic: true,
            multiplicity,
        }
    }

    /// Endpoint with no constraint of its own, inherited from a base
    /// relationship.
    pub fn inherited() -> Self {
        Self {
            types: Vec::new(),
            polymorphic: true,
            multiplicity: Multiplicity::default(),
        }
    }

    /// Add another constraint type.
    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.types.push(ty.into());
        self
    }

    /// Accept only the constraint types themselves.
    pub fn exact(mut self) -> Self {
        self.polymorphic = false;
        self
    }
}

/// A relationship type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeDef {
    /// Relationship name (unique within schema).
    pub name: String,
    /// Display label. Defaults to the name.
    #[serde(default)]
    pub label: Option<String>,
    /// Source end.
    pub source: EndpointDef,
    /// Target end.
    pub target: EndpointDef,
    /// Relationship-own properties.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    /// Base relationship type.
    #[serde(default)]
    pub base: Option<String>,
}

impl RelationshipTypeDef {
    /// Create a new relationship type.
    pub fn new(name: impl Into<String>, source: EndpointDef, target: EndpointDef) -> Self {
        Self {
            name: name.into(),
            label: None,
            source,
            target,
            properties: Vec::new(),
            base: None,
        }
    }

    /// Create a relationship derived from `base`, inheriting its endpoints.
    pub fn derived(name: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            source: EndpointDef::inherited(),
            target: EndpointDef::inherited(),
            properties: Vec::new(),
            base: Some(base.into()),
        }
    }

    /// Set the base relationship.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Add a relationship-own property.
    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Endpoints as (from, to) for a traversal direction.
    pub fn oriented(&self, direction: Direction) -> (&EndpointDef, &EndpointDef) {
        match direction {
            Direction::Forward => (&self.source, &self.target),
            Direction::Backward => (&self.target, &self.source),
        }
    }

    /// Label shown for this relationship.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}
