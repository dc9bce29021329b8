//! Content rule sets.

use super::path::RelationshipPath;
use super::spec::{CategorySpec, ContentModifier, RelatedContentSpec};
use crate::catalog::SchemaBundle;
use relcontent_proto::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which instances become the rows of the content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSelection {
    /// One row per requested instance.
    #[default]
    SelectedInstances,
    /// One row per instance reached from the requested instances through
    /// `path`. Recursive paths yield every descendant as its own row.
    RelatedInstances { path: RelationshipPath },
    /// One row per instance of `classes`, independent of the requested
    /// instances. With `polymorphic`, instances of derived classes are rows
    /// as well.
    InstancesOfClasses {
        classes: Vec<String>,
        #[serde(default)]
        polymorphic: bool,
    },
}

/// A named set of content rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRuleSet {
    /// Rule set identity, part of the descriptor cache key.
    pub id: String,
    #[serde(default)]
    pub selection: ContentSelection,
    #[serde(default)]
    pub categories: Vec<CategorySpec>,
    #[serde(default)]
    pub modifiers: Vec<ContentModifier>,
}

/// A related content specification in its evaluation order.
#[derive(Debug, Clone, Copy)]
pub struct OrderedSpec<'a> {
    pub spec: &'a RelatedContentSpec,
    /// Effective priority.
    pub priority: i32,
    /// Declaration order across the rule set.
    pub order: usize,
    /// Index of the owning modifier.
    pub modifier: usize,
}

impl ContentRuleSet {
    /// Create an empty rule set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selection: ContentSelection::default(),
            categories: Vec::new(),
            modifiers: Vec::new(),
        }
    }

    /// Set the content selection.
    pub fn with_selection(mut self, selection: ContentSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Add a category.
    pub fn with_category(mut self, category: CategorySpec) -> Self {
        self.categories.push(category);
        self
    }

    /// Add a modifier.
    pub fn with_modifier(mut self, modifier: ContentModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Look up a category by id.
    pub fn category(&self, id: &str) -> Option<&CategorySpec> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Modifiers applicable to a root type, with their indices.
    pub fn applicable_modifiers(
        &self,
        schema: &SchemaBundle,
        root_type: &str,
        variables: &BTreeMap<String, Value>,
    ) -> Vec<(usize, &ContentModifier)> {
        self.modifiers
            .iter()
            .enumerate()
            .filter(|(_, m)| m.applies_to(schema, root_type, variables))
            .collect()
    }

    /// Related content specifications applicable to a root type, ordered by
    /// effective priority (descending), then declaration order.
    pub fn ordered_specs(
        &self,
        schema: &SchemaBundle,
        root_type: &str,
        variables: &BTreeMap<String, Value>,
    ) -> Vec<OrderedSpec<'_>> {
        let mut order = 0;
        let mut specs = Vec::new();
        for (index, modifier) in self.modifiers.iter().enumerate() {
            let applies = modifier.applies_to(schema, root_type, variables);
            for spec in &modifier.related_properties {
                if applies {
                    specs.push(OrderedSpec {
                        spec,
                        priority: spec.priority.unwrap_or(modifier.priority),
                        order,
                        modifier: index,
                    });
                }
                order += 1;
            }
        }
        specs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityTypeDef;
    use crate::rules::{RelationshipStep, RuleCondition};

    fn spec(rel: &str) -> RelatedContentSpec {
        RelatedContentSpec::new(RelationshipStep::forward(rel))
    }

    #[test]
    fn test_ordered_specs() {
        let schema = SchemaBundle::new(1).with_entity(EntityTypeDef::new("Element"));
        let rules = ContentRuleSet::new("rules")
            .with_modifier(
                ContentModifier::new("Element")
                    .with_priority(1000)
                    .with_related(spec("A"))
                    .with_related(spec("B").with_priority(3000)),
            )
            .with_modifier(
                ContentModifier::new("Element")
                    .with_priority(1000)
                    .with_related(spec("C")),
            )
            .with_modifier(
                ContentModifier::new("Element")
                    .with_condition(RuleCondition::new("x", 1))
                    .with_related(spec("D").with_priority(9000)),
            );

        let vars = BTreeMap::new();
        let ordered = rules.ordered_specs(&schema, "Element", &vars);
        let rels: Vec<_> = ordered
            .iter()
            .map(|o| o.spec.path.steps()[0].relationship.as_str())
            .collect();
        assert_eq!(rels, vec!["B", "A", "C"]);
        assert_eq!(ordered[0].priority, 3000);
        assert_eq!(ordered[2].order, 2);
        assert_eq!(ordered[2].modifier, 1);
    }

    #[test]
    fn test_ruleset_from_json() {
        let rules: ContentRuleSet = serde_json::from_str(
            r#"{
                "id": "tree",
                "selection": {"kind": "related_instances", "path": [{"relationship": "OwnsChild", "depth": {"max": null}}]},
                "categories": [{"id": "geo", "label": "Geometry"}]
            }"#,
        )
        .unwrap();

        assert!(matches!(rules.selection, ContentSelection::RelatedInstances { .. }));
        assert_eq!(rules.category("geo").map(|c| c.label.as_str()), Some("Geometry"));
        assert!(rules.modifiers.is_empty());
    }

    #[test]
    fn test_instances_of_classes_from_json() {
        let rules: ContentRuleSet = serde_json::from_str(
            r#"{"id": "all", "selection": {"kind": "instances_of_classes", "classes": ["Aspect"]}}"#,
        )
        .unwrap();

        assert_eq!(
            rules.selection,
            ContentSelection::InstancesOfClasses {
                classes: vec!["Aspect".to_string()],
                polymorphic: false,
            }
        );
    }
}
