//! Schema bundle - versioned snapshot of the entire schema.

use super::entity::EntityTypeDef;
use super::property::ResolvedProperty;
use super::relationship::{EndpointDef, RelationshipTypeDef};
use super::types::Direction;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A versioned snapshot of the entire schema.
///
/// The bundle keeps a derivation index (base type to directly derived types)
/// that is updated as types are added, so polymorphic resolution only walks
/// the subtree below the requested type.
///
/// Serializes as a list of entity types and a list of relationship types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "SchemaDocument", into = "SchemaDocument")]
pub struct SchemaBundle {
    /// Schema version (monotonically increasing).
    pub version: u64,
    /// Entity type definitions keyed by name.
    entities: HashMap<String, EntityTypeDef>,
    /// Relationship type definitions keyed by name.
    relationships: HashMap<String, RelationshipTypeDef>,
    /// Directly derived entity types keyed by base type.
    derived_types: HashMap<String, BTreeSet<String>>,
    /// Directly derived relationship types keyed by base relationship.
    derived_relationships: HashMap<String, BTreeSet<String>>,
}

/// Externalized form of a [`SchemaBundle`].
#[derive(Serialize, Deserialize)]
struct SchemaDocument {
    version: u64,
    #[serde(default)]
    entities: Vec<EntityTypeDef>,
    #[serde(default)]
    relationships: Vec<RelationshipTypeDef>,
}

impl From<SchemaDocument> for SchemaBundle {
    fn from(doc: SchemaDocument) -> Self {
        let mut schema = SchemaBundle::new(doc.version);
        for entity in doc.entities {
            schema.add_entity(entity);
        }
        for relationship in doc.relationships {
            schema.add_relationship(relationship);
        }
        schema
    }
}

impl From<SchemaBundle> for SchemaDocument {
    fn from(schema: SchemaBundle) -> Self {
        let mut entities: Vec<EntityTypeDef> = schema.entities.into_values().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        let mut relationships: Vec<RelationshipTypeDef> = schema.relationships.into_values().collect();
        relationships.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            version: schema.version,
            entities,
            relationships,
        }
    }
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// Add an entity type to the schema.
    pub fn with_entity(mut self, entity: EntityTypeDef) -> Self {
        self.add_entity(entity);
        self
    }

    /// Add a relationship type to the schema.
    pub fn with_relationship(mut self, relationship: RelationshipTypeDef) -> Self {
        self.add_relationship(relationship);
        self
    }

    /// Add an entity type in place.
    pub fn add_entity(&mut self, entity: EntityTypeDef) {
        if let Some(previous) = self.entities.get(&entity.name) {
            for base in &previous.base_types {
                if let Some(set) = self.derived_types.get_mut(base) {
                    set.remove(&entity.name);
                }
            }
        }
        for base in &entity.base_types {
            self.derived_types
                .entry(base.clone())
                .or_default()
                .insert(entity.name.clone());
        }
        self.entities.insert(entity.name.clone(), entity);
    }

    /// Add a relationship type in place.
    pub fn add_relationship(&mut self, relationship: RelationshipTypeDef) {
        if let Some(previous) = self.relationships.get(&relationship.name) {
            if let Some(base) = &previous.base {
                if let Some(set) = self.derived_relationships.get_mut(base) {
                    set.remove(&relationship.name);
                }
            }
        }
        if let Some(base) = &relationship.base {
            self.derived_relationships
                .entry(base.clone())
                .or_default()
                .insert(relationship.name.clone());
        }
        self.relationships
            .insert(relationship.name.clone(), relationship);
    }

    /// Get an entity type by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityTypeDef> {
        self.entities.get(name)
    }

    /// Get an entity type by name, failing when absent.
    pub fn entity(&self, name: &str) -> Result<&EntityTypeDef, Error> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
    }

    /// Get a relationship type by name.
    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipTypeDef> {
        self.relationships.get(name)
    }

    /// Get a relationship type by name, failing when absent.
    pub fn relationship(&self, name: &str) -> Result<&RelationshipTypeDef, Error> {
        self.relationships
            .get(name)
            .ok_or_else(|| Error::UnknownRelationship(name.to_string()))
    }

    /// List all entity type names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// List all relationship type names, sorted.
    pub fn relationship_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.relationships.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check that every referenced type and relationship exists and that the
    /// base hierarchies are acyclic.
    pub fn validate(&self) -> Result<(), Error> {
        for entity in self.entities.values() {
            for base in &entity.base_types {
                self.entity(base)?;
            }
            if self.ancestors(&entity.name).iter().any(|a| a == &entity.name) {
                return Err(Error::InvalidData(format!(
                    "entity type {} derives from itself",
                    entity.name
                )));
            }
        }
        for rel in self.relationships.values() {
            let mut seen = HashSet::new();
            let mut current = rel;
            while let Some(base) = &current.base {
                if !seen.insert(base.clone()) || base == &rel.name {
                    return Err(Error::InvalidData(format!(
                        "relationship type {} derives from itself",
                        rel.name
                    )));
                }
                current = self.relationship(base)?;
            }
            for direction in [Direction::Forward, Direction::Backward] {
                let (source, target) = self.relationship_endpoints(&rel.name, direction)?;
                for ty in source.types.iter().chain(&target.types) {
                    self.entity(ty)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve the set of types derived from `ty`, including `ty` itself.
    ///
    /// Abstract types are left out unless `include_abstract` is set.
    pub fn resolve_derived_types(
        &self,
        ty: &str,
        include_abstract: bool,
    ) -> Result<BTreeSet<String>, Error> {
        self.entity(ty)?;

        let mut result = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([ty.to_string()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.entities.get(&current) {
                if include_abstract || !def.is_abstract {
                    result.insert(current.clone());
                }
            }
            if let Some(children) = self.derived_types.get(&current) {
                queue.extend(children.iter().cloned());
            }
        }

        Ok(result)
    }

    /// All transitive base types of `ty`, nearest first.
    pub fn ancestors(&self, ty: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<String> = self
            .entities
            .get(ty)
            .map(|e| e.base_types.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.entities.get(&current) {
                queue.extend(def.base_types.iter().cloned());
            }
            result.push(current);
        }

        result
    }

    /// Check whether `ty` is `base` or derives from it.
    pub fn is_derived_from(&self, ty: &str, base: &str) -> bool {
        ty == base || self.ancestors(ty).iter().any(|a| a == base)
    }

    /// Check whether a type is hidden. Unknown types are not hidden.
    pub fn is_hidden(&self, ty: &str) -> bool {
        self.entities.get(ty).map(|e| e.hidden).unwrap_or(false)
    }

    /// Check whether a type is abstract. Unknown types are not abstract.
    pub fn is_abstract(&self, ty: &str) -> bool {
        self.entities.get(ty).map(|e| e.is_abstract).unwrap_or(false)
    }

    /// All properties of a type, including inherited ones.
    ///
    /// Base-type properties come first. A property name declared on several
    /// types in the hierarchy is reported once, for the most basic declaring
    /// type.
    pub fn properties(&self, ty: &str) -> Result<Vec<ResolvedProperty>, Error> {
        self.entity(ty)?;

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        self.collect_base_first(ty, &mut visited, &mut order);

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for declaring in order {
            if let Some(def) = self.entities.get(declaring) {
                for property in &def.properties {
                    if seen.insert(property.name.clone()) {
                        result.push(ResolvedProperty {
                            declaring_type: declaring.to_string(),
                            def: property.clone(),
                        });
                    }
                }
            }
        }
        Ok(result)
    }

    fn collect_base_first<'a>(
        &'a self,
        ty: &'a str,
        visited: &mut HashSet<&'a str>,
        order: &mut Vec<&'a str>,
    ) {
        if !visited.insert(ty) {
            return;
        }
        if let Some(def) = self.entities.get(ty) {
            for base in &def.base_types {
                self.collect_base_first(base, visited, order);
            }
        }
        order.push(ty);
    }

    /// Look up one property of a type, including inherited ones.
    pub fn property(&self, ty: &str, name: &str) -> Result<ResolvedProperty, Error> {
        self.properties(ty)?
            .into_iter()
            .find(|p| p.def.name == name)
            .ok_or_else(|| Error::UnknownProperty {
                entity: ty.to_string(),
                property: name.to_string(),
            })
    }

    /// Relationship-own properties, including those of base relationships.
    /// Each is tagged with `rel` as its declaring type.
    pub fn relationship_properties(&self, rel: &str) -> Result<Vec<ResolvedProperty>, Error> {
        let mut chain = vec![self.relationship(rel)?];
        let mut seen_rels = HashSet::from([rel.to_string()]);
        while let Some(base) = chain.last().and_then(|r| r.base.as_ref()) {
            if !seen_rels.insert(base.clone()) {
                break;
            }
            chain.push(self.relationship(base)?);
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for def in chain.iter().rev() {
            for property in &def.properties {
                if seen.insert(property.name.clone()) {
                    result.push(ResolvedProperty {
                        declaring_type: rel.to_string(),
                        def: property.clone(),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Endpoints of a relationship oriented for a traversal direction, as
    /// (source constraint, target constraint).
    ///
    /// An end with no constraint types is inherited from the nearest base
    /// relationship that declares one.
    pub fn relationship_endpoints(
        &self,
        rel: &str,
        direction: Direction,
    ) -> Result<(EndpointDef, EndpointDef), Error> {
        let def = self.relationship(rel)?;
        let mut source = def.source.clone();
        let mut target = def.target.clone();

        let mut visited = HashSet::from([rel.to_string()]);
        let mut current = def;
        while source.types.is_empty() || target.types.is_empty() {
            let Some(base) = &current.base else { break };
            if !visited.insert(base.clone()) {
                break;
            }
            current = self.relationship(base)?;
            if source.types.is_empty() {
                source = current.source.clone();
            }
            if target.types.is_empty() {
                target = current.target.clone();
            }
        }

        Ok(match direction {
            Direction::Forward => (source, target),
            Direction::Backward => (target, source),
        })
    }

    /// Relationship types derived from `rel`, including `rel` itself.
    pub fn derived_relationships(&self, rel: &str) -> Result<BTreeSet<String>, Error> {
        self.relationship(rel)?;

        let mut result = BTreeSet::new();
        let mut queue = VecDeque::from([rel.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !result.insert(current.clone()) {
                continue;
            }
            if let Some(children) = self.derived_relationships.get(&current) {
                queue.extend(children.iter().cloned());
            }
        }
        Ok(result)
    }
}
