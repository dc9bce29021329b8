//! Related content specifications, modifiers and categories.

use super::path::RelationshipPath;
use super::selector::{PropertyOverride, PropertySelector};
use crate::catalog::SchemaBundle;
use relcontent_proto::{FilterExpr, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What related content means relative to the instance it hangs off.
///
/// Controls grouping, not traversal: `SameInstance` content (aspects, for
/// example) is categorized beside the instance's own properties, while
/// `RelatedInstance` content nests under its parent's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipMeaning {
    #[default]
    SameInstance,
    RelatedInstance,
}

fn default_properties() -> Vec<PropertySelector> {
    vec![PropertySelector::All]
}

/// Related content to show for an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedContentSpec {
    /// Path from the owning type to the related content type.
    pub path: RelationshipPath,
    /// Properties of the target type.
    #[serde(default = "default_properties")]
    pub properties: Vec<PropertySelector>,
    /// Properties of the last step's relationship type.
    #[serde(default)]
    pub relationship_properties: Vec<PropertySelector>,
    #[serde(default)]
    pub meaning: RelationshipMeaning,
    /// Expand the last step's target types to their derived types.
    #[serde(default)]
    pub polymorphic: bool,
    #[serde(default)]
    pub auto_expand: bool,
    /// Default duplicate handling for every selected property.
    #[serde(default)]
    pub skip_if_duplicate: bool,
    /// Collapse to-many values into one item when they agree.
    #[serde(default)]
    pub merge_related_instances: bool,
    /// Instance filter applied to the last step's targets.
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    /// Content nested under this specification's target.
    #[serde(default)]
    pub nested: Vec<RelatedContentSpec>,
    /// Own priority. Falls back to the owning modifier's.
    #[serde(default)]
    pub priority: Option<i32>,
}

impl RelatedContentSpec {
    /// Create a specification selecting all target properties.
    pub fn new(path: impl Into<RelationshipPath>) -> Self {
        Self {
            path: path.into(),
            properties: default_properties(),
            relationship_properties: Vec::new(),
            meaning: RelationshipMeaning::default(),
            polymorphic: false,
            auto_expand: false,
            skip_if_duplicate: false,
            merge_related_instances: false,
            filter: None,
            nested: Vec::new(),
            priority: None,
        }
    }

    /// Replace the target property selectors.
    pub fn with_properties(mut self, properties: Vec<PropertySelector>) -> Self {
        self.properties = properties;
        self
    }

    /// Set relationship property selectors.
    pub fn with_relationship_properties(mut self, properties: Vec<PropertySelector>) -> Self {
        self.relationship_properties = properties;
        self
    }

    /// Set the meaning.
    pub fn with_meaning(mut self, meaning: RelationshipMeaning) -> Self {
        self.meaning = meaning;
        self
    }

    /// Expand target types polymorphically.
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// Auto-expand the nested field.
    pub fn auto_expand(mut self) -> Self {
        self.auto_expand = true;
        self
    }

    /// Skip duplicated properties by default.
    pub fn skip_if_duplicate(mut self) -> Self {
        self.skip_if_duplicate = true;
        self
    }

    /// Declare the nested field duplicate-sensitive.
    pub fn merge_related_instances(mut self) -> Self {
        self.merge_related_instances = true;
        self
    }

    /// Set the instance filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add nested content.
    pub fn with_nested(mut self, nested: RelatedContentSpec) -> Self {
        self.nested.push(nested);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Condition on ruleset variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Variable name.
    pub variable: String,
    /// Required value.
    pub equals: Value,
}

impl RuleCondition {
    /// Create a condition.
    pub fn new(variable: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            variable: variable.into(),
            equals: equals.into(),
        }
    }

    /// Check the condition against variable bindings. An unbound variable
    /// never matches.
    pub fn is_satisfied(&self, variables: &BTreeMap<String, Value>) -> bool {
        variables
            .get(&self.variable)
            .is_some_and(|v| v == &self.equals)
    }
}

fn default_true() -> bool {
    true
}

/// Attaches property overrides and related content to an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentModifier {
    /// Entity type the modifier applies to.
    pub class: String,
    /// Also apply to types derived from `class`.
    #[serde(default = "default_true")]
    pub polymorphic: bool,
    /// Priority inherited by specifications without their own.
    #[serde(default)]
    pub priority: i32,
    /// Variable condition gating the modifier.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Overrides for the type's own properties.
    #[serde(default)]
    pub property_overrides: Vec<PropertyOverride>,
    /// Related content.
    #[serde(default)]
    pub related_properties: Vec<RelatedContentSpec>,
}

impl ContentModifier {
    /// Create a polymorphic modifier for a type.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            polymorphic: true,
            priority: 0,
            condition: None,
            property_overrides: Vec::new(),
            related_properties: Vec::new(),
        }
    }

    /// Apply to `class` only.
    pub fn exact(mut self) -> Self {
        self.polymorphic = false;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Gate on a variable condition.
    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Add a property override.
    pub fn with_property_override(mut self, o: PropertyOverride) -> Self {
        self.property_overrides.push(o);
        self
    }

    /// Add related content.
    pub fn with_related(mut self, spec: RelatedContentSpec) -> Self {
        self.related_properties.push(spec);
        self
    }

    /// Check whether the modifier applies to a root type under the given
    /// variable bindings.
    pub fn applies_to(
        &self,
        schema: &SchemaBundle,
        root_type: &str,
        variables: &BTreeMap<String, Value>,
    ) -> bool {
        let class_matches = if self.polymorphic {
            schema.is_derived_from(root_type, &self.class)
        } else {
            root_type == self.class
        };
        class_matches
            && self
                .condition
                .as_ref()
                .map_or(true, |c| c.is_satisfied(variables))
    }
}

/// A display category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Category id referenced by property overrides.
    pub id: String,
    /// Display label.
    pub label: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub auto_expand: bool,
    /// Parent category id.
    #[serde(default)]
    pub parent: Option<String>,
}

impl CategorySpec {
    /// Create a root category.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            priority: 0,
            auto_expand: false,
            parent: None,
        }
    }

    /// Set the parent category.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
