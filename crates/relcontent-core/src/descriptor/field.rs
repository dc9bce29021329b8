//! Descriptor fields.

use crate::catalog::{Direction, Multiplicity, ScalarType};
use crate::content::TraversalStep;
use crate::resolve::ResolvedStep;
use crate::rules::{DepthRange, RelationshipMeaning};
use relcontent_proto::FilterExpr;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Index of a field in a descriptor's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldId(pub usize);

/// What a field's values are read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ContentClass {
    /// An entity type.
    Entity(String),
    /// A relationship type's own properties.
    Relationship(String),
}

impl ContentClass {
    /// Type name without the kind.
    pub fn name(&self) -> &str {
        match self {
            ContentClass::Entity(name) | ContentClass::Relationship(name) => name,
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentClass::Entity(name) => write!(f, "{}", name),
            ContentClass::Relationship(name) => write!(f, "rel:{}", name),
        }
    }
}

/// One hop on a nested field's path from its parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStep {
    pub relationship: String,
    /// The relationship and every relationship derived from it.
    pub relationship_types: BTreeSet<String>,
    pub direction: Direction,
    /// Concrete types reached by this hop. Instances of other types are
    /// dropped.
    pub target_types: BTreeSet<String>,
    /// Concrete types a recursive hop may pass through.
    pub pass_through_types: BTreeSet<String>,
    pub multiplicity: Multiplicity,
    pub depth: DepthRange,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterExpr>,
}

impl FieldStep {
    /// Whether this hop can yield more than one target per source.
    pub fn is_many(&self) -> bool {
        self.multiplicity.is_many() || self.depth.is_recursive()
    }

    /// The provider request for this hop.
    pub fn traversal_step(&self) -> TraversalStep {
        let mut targets = self.target_types.clone();
        if self.depth.is_recursive() {
            targets.extend(self.pass_through_types.iter().cloned());
        }
        TraversalStep::new(self.relationship_types.clone(), self.direction, targets)
            .with_filters(self.filters.clone())
    }

    /// Canonical form of the hop for field keys. Target types are left out
    /// so that variants of one logical path share a key.
    pub fn signature(&self) -> String {
        let filters = if self.filters.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.filters).unwrap_or_default()
        };
        format!("{}:{}{}{}", self.relationship, self.direction, self.depth, filters)
    }

    /// Union another variant of the same hop into this one.
    pub(crate) fn absorb(&mut self, other: &FieldStep) {
        self.target_types.extend(other.target_types.iter().cloned());
        self.pass_through_types
            .extend(other.pass_through_types.iter().cloned());
    }
}

impl From<&ResolvedStep> for FieldStep {
    fn from(step: &ResolvedStep) -> Self {
        Self {
            relationship: step.relationship.clone(),
            relationship_types: step.relationship_types.clone(),
            direction: step.direction,
            target_types: BTreeSet::from([step.target_type.clone()]),
            pass_through_types: if step.depth.is_recursive() {
                step.step_targets.clone()
            } else {
                BTreeSet::new()
            },
            multiplicity: step.multiplicity,
            depth: step.depth,
            filters: step.filters.clone(),
        }
    }
}

/// Signature of a whole path.
pub fn path_signature(path: &[FieldStep]) -> String {
    path.iter()
        .map(FieldStep::signature)
        .collect::<Vec<_>>()
        .join("/")
}

/// An (entity type, property) pair read by a properties field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PropertyPair {
    pub class: String,
    pub property: String,
}

/// A leaf field showing one logical property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertiesField {
    pub content: ContentClass,
    pub property: String,
    pub value_type: ScalarType,
    /// Concrete types exposing the property. Rows of other types read null.
    pub pairs: Vec<PropertyPair>,
}

impl PropertiesField {
    /// Property name to read for a row of `class`, if the field applies.
    pub fn property_for(&self, class: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.class == class)
            .map(|p| p.property.as_str())
    }
}

/// A field holding related content reached through a path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedContentField {
    /// Concrete content type at the end of the path.
    pub content_type: String,
    /// Path from the parent row to the content.
    pub path: Vec<FieldStep>,
    /// Row types the field is reachable from.
    pub actual_source_types: BTreeSet<String>,
    /// Child fields in display order.
    pub children: Vec<FieldId>,
    pub auto_expand: bool,
    pub meaning: RelationshipMeaning,
    /// Declared duplicate-sensitive: to-many values may be collapsed.
    pub merge_related_instances: bool,
}

impl NestedContentField {
    /// Whether the field holds an array rather than a single item.
    pub fn is_many(&self) -> bool {
        self.path.iter().any(FieldStep::is_many)
    }

    /// Last relationship on the path.
    pub fn relationship(&self) -> Option<&str> {
        self.path.last().map(|s| s.relationship.as_str())
    }
}

/// Field payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Properties(PropertiesField),
    Nested(NestedContentField),
}

/// A descriptor field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub id: FieldId,
    /// Stable unique name, used as the key in record value maps.
    pub name: String,
    pub label: String,
    /// Category id.
    pub category: String,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<FieldId>,
    pub kind: FieldKind,
}

impl Field {
    /// Get the properties payload.
    pub fn as_properties(&self) -> Option<&PropertiesField> {
        match &self.kind {
            FieldKind::Properties(p) => Some(p),
            FieldKind::Nested(_) => None,
        }
    }

    /// Get the nested content payload.
    pub fn as_nested(&self) -> Option<&NestedContentField> {
        match &self.kind {
            FieldKind::Nested(n) => Some(n),
            FieldKind::Properties(_) => None,
        }
    }

    /// Child fields. Empty for properties fields.
    pub fn children(&self) -> &[FieldId] {
        match &self.kind {
            FieldKind::Nested(n) => &n.children,
            FieldKind::Properties(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(target: &str) -> FieldStep {
        FieldStep {
            relationship: "ElementOwnsAspects".into(),
            relationship_types: BTreeSet::from(["ElementOwnsAspects".to_string()]),
            direction: Direction::Forward,
            target_types: BTreeSet::from([target.to_string()]),
            pass_through_types: BTreeSet::new(),
            multiplicity: Multiplicity::ZeroOrMany,
            depth: DepthRange::default(),
            filters: Vec::new(),
        }
    }

    #[test]
    fn test_signature_ignores_target_types() {
        assert_eq!(step("Aspect1").signature(), step("Aspect2").signature());
        assert_eq!(
            path_signature(&[step("A"), step("B")]),
            "ElementOwnsAspects:forward[1, 1]/ElementOwnsAspects:forward[1, 1]"
        );
    }

    #[test]
    fn test_signature_includes_filters() {
        let mut filtered = step("Aspect1");
        filtered.filters.push(FilterExpr::eq("Prop", 1));
        assert_ne!(filtered.signature(), step("Aspect1").signature());
    }

    #[test]
    fn test_traversal_step_targets() {
        let mut recursive = step("Node");
        recursive.depth = DepthRange::unbounded();
        recursive.pass_through_types.insert("Folder".into());
        assert_eq!(recursive.traversal_step().target_types.len(), 2);
        assert_eq!(step("Node").traversal_step().target_types.len(), 1);
    }

    #[test]
    fn test_property_for() {
        let field = PropertiesField {
            content: ContentClass::Entity("Element".into()),
            property: "CodeValue".into(),
            value_type: ScalarType::String,
            pairs: vec![PropertyPair {
                class: "PhysicalElement".into(),
                property: "CodeValue".into(),
            }],
        };
        assert_eq!(field.property_for("PhysicalElement"), Some("CodeValue"));
        assert_eq!(field.property_for("Element"), None);
    }
}
