//! In-memory instance provider.

use super::filter::FilterEvaluator;
use super::provider::{InstanceProvider, ProviderError, RelatedInstance, TraversalStep};
use crate::catalog::Direction;
use relcontent_proto::{InstanceKey, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct Link {
    relationship: String,
    source: InstanceKey,
    target: InstanceKey,
    properties: BTreeMap<String, Value>,
}

/// Call counters of a [`MemoryInstanceStore`].
#[derive(Debug, Default)]
pub struct ProviderStats {
    related_calls: AtomicU64,
    property_calls: AtomicU64,
}

impl ProviderStats {
    /// Number of `fetch_related` calls.
    pub fn related_calls(&self) -> u64 {
        self.related_calls.load(Ordering::Relaxed)
    }

    /// Number of `fetch_property_values` calls.
    pub fn property_calls(&self) -> u64 {
        self.property_calls.load(Ordering::Relaxed)
    }

    /// Reset both counters.
    pub fn reset(&self) {
        self.related_calls.store(0, Ordering::Relaxed);
        self.property_calls.store(0, Ordering::Relaxed);
    }
}

/// Instance provider over instances and links held in memory.
///
/// Links are indexed by both endpoints on insert. Related targets are
/// returned in link insertion order.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    instances: HashMap<InstanceKey, BTreeMap<String, Value>>,
    links: Vec<Link>,
    outgoing: HashMap<InstanceKey, Vec<usize>>,
    incoming: HashMap<InstanceKey, Vec<usize>>,
    stats: ProviderStats,
}

impl MemoryInstanceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an instance.
    pub fn insert(&mut self, key: InstanceKey, properties: BTreeMap<String, Value>) {
        self.instances.insert(key, properties);
    }

    /// Insert an instance from (name, value) pairs.
    pub fn with_instance<I, S, V>(mut self, key: InstanceKey, properties: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        let props = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.insert(key, props);
        self
    }

    /// Add a link from `source` to `target`.
    pub fn link(&mut self, relationship: impl Into<String>, source: InstanceKey, target: InstanceKey) {
        self.link_with_properties(relationship, source, target, BTreeMap::new());
    }

    /// Add a link carrying relationship-own property values.
    pub fn link_with_properties(
        &mut self,
        relationship: impl Into<String>,
        source: InstanceKey,
        target: InstanceKey,
        properties: BTreeMap<String, Value>,
    ) {
        let index = self.links.len();
        self.outgoing.entry(source.clone()).or_default().push(index);
        self.incoming.entry(target.clone()).or_default().push(index);
        self.links.push(Link {
            relationship: relationship.into(),
            source,
            target,
            properties,
        });
    }

    /// Builder form of [`link`](Self::link).
    pub fn with_link(
        mut self,
        relationship: impl Into<String>,
        source: InstanceKey,
        target: InstanceKey,
    ) -> Self {
        self.link(relationship, source, target);
        self
    }

    /// Get an instance's properties.
    pub fn instance(&self, key: &InstanceKey) -> Option<&BTreeMap<String, Value>> {
        self.instances.get(key)
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if the store holds no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Call counters.
    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }
}

impl InstanceProvider for MemoryInstanceStore {
    fn fetch_related(
        &self,
        sources: &[InstanceKey],
        step: &TraversalStep,
    ) -> Result<HashMap<InstanceKey, Vec<RelatedInstance>>, ProviderError> {
        self.stats.related_calls.fetch_add(1, Ordering::Relaxed);

        let empty = BTreeMap::new();
        let mut result = HashMap::new();
        for source in sources {
            if result.contains_key(source) {
                continue;
            }
            let index = match step.direction {
                Direction::Forward => self.outgoing.get(source),
                Direction::Backward => self.incoming.get(source),
            };
            let mut related = Vec::new();
            for &link_id in index.into_iter().flatten() {
                let link = &self.links[link_id];
                if !step.relationship_types.contains(&link.relationship) {
                    continue;
                }
                let other = match step.direction {
                    Direction::Forward => &link.target,
                    Direction::Backward => &link.source,
                };
                if !step.target_types.is_empty() && !step.target_types.contains(&other.class) {
                    continue;
                }
                let props = self.instances.get(other).unwrap_or(&empty);
                if !FilterEvaluator::evaluate_all(&step.filters, props) {
                    continue;
                }
                related.push(RelatedInstance {
                    key: other.clone(),
                    relationship: link.relationship.clone(),
                    properties: link.properties.clone(),
                });
            }
            result.insert(source.clone(), related);
        }
        Ok(result)
    }

    fn fetch_property_values(
        &self,
        instances: &[InstanceKey],
        properties: &[String],
    ) -> Result<HashMap<InstanceKey, BTreeMap<String, Value>>, ProviderError> {
        self.stats.property_calls.fetch_add(1, Ordering::Relaxed);

        let mut result = HashMap::new();
        for key in instances {
            let Some(stored) = self.instances.get(key) else {
                continue;
            };
            let values = properties
                .iter()
                .filter_map(|p| stored.get(p).map(|v| (p.clone(), v.clone())))
                .collect();
            result.insert(key.clone(), values);
        }
        Ok(result)
    }

    fn fetch_instances_of(&self, classes: &BTreeSet<String>) -> Result<Vec<InstanceKey>, ProviderError> {
        let mut keys: Vec<InstanceKey> = self
            .instances
            .keys()
            .filter(|k| classes.contains(&k.class))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
