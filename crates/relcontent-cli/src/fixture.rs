//! JSON fixtures: a schema, a rule set and the instances to read content
//! from.

use crate::error::CliError;
use relcontent_core::content::MemoryInstanceStore;
use relcontent_core::{ContentRuleSet, SchemaBundle};
use relcontent_proto::{InstanceKey, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A fixture file.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub schema: SchemaBundle,
    pub rules: ContentRuleSet,
    #[serde(default)]
    pub instances: Vec<FixtureInstance>,
    #[serde(default)]
    pub links: Vec<FixtureLink>,
}

/// An instance and its property values.
#[derive(Debug, Deserialize)]
pub struct FixtureInstance {
    pub key: InstanceKey,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// A link between two instances.
#[derive(Debug, Deserialize)]
pub struct FixtureLink {
    pub relationship: String,
    pub source: InstanceKey,
    pub target: InstanceKey,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Fixture {
    /// Read a fixture file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse fixture JSON.
    pub fn parse(text: &str) -> Result<Self, CliError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load the instances and links into an in-memory store.
    pub fn store(&self) -> MemoryInstanceStore {
        let mut store = MemoryInstanceStore::new();
        for instance in &self.instances {
            store.insert(instance.key.clone(), instance.properties.clone());
        }
        for link in &self.links {
            store.link_with_properties(
                link.relationship.clone(),
                link.source.clone(),
                link.target.clone(),
                link.properties.clone(),
            );
        }
        store
    }

    /// Every instance of the given types, in fixture order.
    pub fn instances_of(&self, types: &[String]) -> Vec<InstanceKey> {
        self.instances
            .iter()
            .filter(|i| types.iter().any(|t| t == &i.key.class))
            .map(|i| i.key.clone())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "schema": {
            "version": 1,
            "entities": [
                {"name": "Element", "properties": [{"name": "CodeValue", "value_type": "string"}]},
                {"name": "Aspect", "properties": [{"name": "Prop", "value_type": "int64"}]}
            ],
            "relationships": [
                {
                    "name": "ElementOwnsAspects",
                    "source": {"types": ["Element"], "multiplicity": "1..1"},
                    "target": {"types": ["Aspect"], "multiplicity": "0..*"}
                }
            ]
        },
        "rules": {
            "id": "sample",
            "modifiers": [
                {"class": "Element", "related_properties": [{"path": [{"relationship": "ElementOwnsAspects"}]}]}
            ]
        },
        "instances": [
            {"key": {"class": "Element", "id": 1}, "properties": {"CodeValue": "E1"}},
            {"key": {"class": "Element", "id": 2}, "properties": {"CodeValue": "E2"}},
            {"key": {"class": "Aspect", "id": 10}, "properties": {"Prop": 7}}
        ],
        "links": [
            {"relationship": "ElementOwnsAspects", "source": {"class": "Element", "id": 1}, "target": {"class": "Aspect", "id": 10}}
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        assert!(fixture.schema.get_entity("Element").is_some());
        assert_eq!(fixture.rules.id, "sample");

        let store = fixture.store();
        assert_eq!(store.len(), 3);
        assert_eq!(store.link_count(), 1);
        assert_eq!(
            fixture.instances_of(&["Element".to_string()]),
            vec![InstanceKey::new("Element", 1), InstanceKey::new("Element", 2)]
        );
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Fixture::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }
}
