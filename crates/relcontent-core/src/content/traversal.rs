//! Batched relationship traversal.
//!
//! Wraps an [`InstanceProvider`] with batching, cancellation checks and
//! breadth-first expansion of recursive steps. Every traversal origin keeps
//! its own visited set and hop counter, so cyclic data terminates and one
//! dense origin cannot truncate another. A failing provider batch only fails
//! the keys it was called with.

use super::cancel::CancellationToken;
use super::provider::{InstanceProvider, ProviderError, RelatedInstance, TraversalStep};
use crate::error::Error;
use crate::rules::DepthRange;
use relcontent_proto::{InstanceKey, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{trace, warn};

/// Outcome of a batched provider call.
#[derive(Debug)]
pub struct Batched<T> {
    pub found: HashMap<InstanceKey, T>,
    /// Keys of each failed batch, with the failure.
    pub failures: Vec<(HashSet<InstanceKey>, Error)>,
}

impl<T> Default for Batched<T> {
    fn default() -> Self {
        Self {
            found: HashMap::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> Batched<T> {
    /// Failure of the batch `key` was part of.
    pub fn failure(&self, key: &InstanceKey) -> Option<&Error> {
        self.failures
            .iter()
            .find(|(keys, _)| keys.contains(key))
            .map(|(_, error)| error)
    }

    /// Every failed key with its failure.
    pub fn failed_keys(&self) -> impl Iterator<Item = (&InstanceKey, &Error)> {
        self.failures
            .iter()
            .flat_map(|(keys, error)| keys.iter().map(move |k| (k, error)))
    }

    /// All values, or the first failure.
    pub fn into_result(self) -> Result<HashMap<InstanceKey, T>, Error> {
        match self.failures.into_iter().next() {
            Some((_, error)) => Err(error),
            None => Ok(self.found),
        }
    }
}

/// Result of expanding a step from a set of origins.
#[derive(Debug, Default)]
pub struct Expansion {
    /// Emitted targets per origin, in breadth-first order.
    pub reached: HashMap<InstanceKey, Vec<RelatedInstance>>,
    /// Origins whose expansion hit the hop limit.
    pub overflowed: Vec<InstanceKey>,
    /// Origins whose expansion met a failed provider batch. They have no
    /// reached targets.
    pub failed: Vec<(InstanceKey, Error)>,
}

impl Expansion {
    /// Emitted targets of one origin.
    pub fn targets(&self, origin: &InstanceKey) -> &[RelatedInstance] {
        self.reached.get(origin).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Provider access with batching and cancellation.
pub struct Traversal<'a> {
    provider: &'a dyn InstanceProvider,
    batch_size: usize,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Traversal<'a> {
    /// Create a traversal over a provider.
    pub fn new(
        provider: &'a dyn InstanceProvider,
        batch_size: usize,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            cancel,
        }
    }

    /// Fail with [`Error::Cancelled`] when cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), Error> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Fetch one hop for a set of sources, one provider call per batch.
    ///
    /// Fails only on cancellation; failed batches are reported in the
    /// outcome.
    pub fn fetch_related(
        &self,
        sources: &[InstanceKey],
        step: &TraversalStep,
    ) -> Result<Batched<Vec<RelatedInstance>>, Error> {
        self.batched(sources, |chunk| {
            trace!(sources = chunk.len(), "fetching related instances");
            self.provider.fetch_related(chunk, step)
        })
    }

    /// Fetch property values, one provider call per batch.
    pub fn fetch_properties(
        &self,
        instances: &[InstanceKey],
        properties: &[String],
    ) -> Result<Batched<BTreeMap<String, Value>>, Error> {
        if properties.is_empty() {
            return Ok(Batched::default());
        }
        self.batched(instances, |chunk| {
            trace!(instances = chunk.len(), properties = properties.len(), "fetching property values");
            self.provider.fetch_property_values(chunk, properties)
        })
    }

    fn batched<T, F>(&self, keys: &[InstanceKey], fetch: F) -> Result<Batched<T>, Error>
    where
        F: Fn(&[InstanceKey]) -> Result<HashMap<InstanceKey, T>, ProviderError>,
    {
        let unique = dedup(keys);
        let mut outcome = Batched {
            found: HashMap::with_capacity(unique.len()),
            failures: Vec::new(),
        };
        for chunk in unique.chunks(self.batch_size) {
            self.check_cancelled()?;
            match fetch(chunk) {
                Ok(found) => outcome.found.extend(found),
                Err(e) => {
                    warn!(keys = chunk.len(), error = %e, "provider batch failed");
                    outcome
                        .failures
                        .push((chunk.iter().cloned().collect(), Error::from(e)));
                }
            }
        }
        Ok(outcome)
    }

    /// Expand a step breadth-first from each origin.
    ///
    /// Instances at depths below `depth.min` are traversed but not emitted.
    /// Once `max_hops` hops were made, one more hop is probed; an origin that
    /// would still reach unvisited instances is reported as overflowed and
    /// its expansion stops there. An origin whose frontier meets a failed
    /// batch is reported as failed and loses its targets.
    pub fn expand(
        &self,
        origins: &[InstanceKey],
        step: &TraversalStep,
        depth: DepthRange,
        max_hops: u32,
    ) -> Result<Expansion, Error> {
        let origins = dedup(origins);
        let max_hops = max_hops.max(1);

        let mut visited: HashMap<InstanceKey, HashSet<InstanceKey>> = origins
            .iter()
            .map(|o| (o.clone(), HashSet::from([o.clone()])))
            .collect();
        let mut expansion = Expansion::default();
        let mut overflowed = HashSet::new();
        let mut failed = HashSet::new();
        let mut frontier: Vec<(InstanceKey, InstanceKey)> =
            origins.iter().map(|o| (o.clone(), o.clone())).collect();
        let mut hops = 0u32;

        while !frontier.is_empty() && depth.continues_after(hops) {
            let sources: Vec<InstanceKey> = frontier.iter().map(|(_, s)| s.clone()).collect();
            let fetched = self.fetch_related(&sources, step)?;
            let probing = hops >= max_hops;
            hops += 1;

            let mut next = Vec::new();
            for (origin, source) in &frontier {
                if failed.contains(origin) {
                    continue;
                }
                if let Some(error) = fetched.failure(source) {
                    failed.insert(origin.clone());
                    expansion.reached.remove(origin);
                    expansion.failed.push((origin.clone(), error.clone()));
                    continue;
                }
                let Some(related) = fetched.found.get(source) else {
                    continue;
                };
                let seen = visited.entry(origin.clone()).or_default();
                for target in related {
                    if seen.contains(&target.key) {
                        continue;
                    }
                    if probing {
                        if overflowed.insert(origin.clone()) {
                            warn!(origin = %origin, max_hops, "recursion overflow, truncating");
                            expansion.overflowed.push(origin.clone());
                        }
                        break;
                    }
                    seen.insert(target.key.clone());
                    if depth.contains(hops) {
                        expansion
                            .reached
                            .entry(origin.clone())
                            .or_default()
                            .push(target.clone());
                    }
                    next.push((origin.clone(), target.key.clone()));
                }
            }
            if probing {
                break;
            }
            next.retain(|(origin, _)| !failed.contains(origin));
            frontier = next;
        }

        expansion.overflowed.retain(|origin| !failed.contains(origin));
        Ok(expansion)
    }
}

/// Remove duplicate keys, keeping first occurrences in order.
pub(crate) fn dedup(keys: &[InstanceKey]) -> Vec<InstanceKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().filter(|k| seen.insert(*k)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Direction;
    use crate::content::MemoryInstanceStore;
    use std::collections::BTreeSet;

    fn node(id: u64) -> InstanceKey {
        InstanceKey::new("Node", id)
    }

    fn owns_child() -> TraversalStep {
        TraversalStep::new(
            BTreeSet::from(["OwnsChild".to_string()]),
            Direction::Forward,
            BTreeSet::from(["Node".to_string()]),
        )
    }

    fn tree() -> MemoryInstanceStore {
        // 1 -> 2, 4; 2 -> 3
        let mut store = MemoryInstanceStore::new();
        for id in 1..=4 {
            store.insert(node(id), BTreeMap::new());
        }
        store.link("OwnsChild", node(1), node(2));
        store.link("OwnsChild", node(1), node(4));
        store.link("OwnsChild", node(2), node(3));
        store
    }

    fn ids(expansion: &Expansion, origin: u64) -> Vec<u64> {
        expansion.targets(&node(origin)).iter().map(|r| r.key.id).collect()
    }

    #[test]
    fn test_expand_unbounded_bfs_order() {
        let store = tree();
        let traversal = Traversal::new(&store, 512, None);

        let expansion = traversal
            .expand(&[node(1)], &owns_child(), DepthRange::unbounded(), 64)
            .unwrap();
        assert_eq!(ids(&expansion, 1), vec![2, 4, 3]);
        assert!(expansion.overflowed.is_empty());
    }

    #[test]
    fn test_expand_min_depth_not_emitted() {
        let store = tree();
        let traversal = Traversal::new(&store, 512, None);

        let expansion = traversal
            .expand(&[node(1)], &owns_child(), DepthRange::new(2, 5), 64)
            .unwrap();
        assert_eq!(ids(&expansion, 1), vec![3]);
    }

    #[test]
    fn test_expand_terminates_on_cycle() {
        let mut store = tree();
        store.link("OwnsChild", node(3), node(1));
        let traversal = Traversal::new(&store, 512, None);

        let expansion = traversal
            .expand(&[node(1)], &owns_child(), DepthRange::unbounded(), 64)
            .unwrap();
        assert_eq!(ids(&expansion, 1), vec![2, 4, 3]);
        assert!(expansion.overflowed.is_empty());
    }

    #[test]
    fn test_expand_overflow_truncates_origin_only() {
        let mut store = tree();
        store.insert(node(10), BTreeMap::new());
        store.insert(node(11), BTreeMap::new());
        store.link("OwnsChild", node(10), node(11));
        let traversal = Traversal::new(&store, 512, None);

        let expansion = traversal
            .expand(&[node(1), node(10)], &owns_child(), DepthRange::unbounded(), 1)
            .unwrap();
        assert_eq!(ids(&expansion, 1), vec![2, 4]);
        assert_eq!(ids(&expansion, 10), vec![11]);
        assert_eq!(expansion.overflowed, vec![node(1)]);
    }

    #[test]
    fn test_fetch_related_batches() {
        let store = tree();
        let traversal = Traversal::new(&store, 2, None);

        let related = traversal
            .fetch_related(&[node(1), node(2), node(3), node(1)], &owns_child())
            .unwrap();
        assert_eq!(related.found.len(), 3);
        assert!(related.failures.is_empty());
        assert_eq!(store.stats().related_calls(), 2);
    }

    struct FailOn<'a> {
        inner: &'a MemoryInstanceStore,
        poison: InstanceKey,
    }

    impl InstanceProvider for FailOn<'_> {
        fn fetch_related(
            &self,
            sources: &[InstanceKey],
            step: &TraversalStep,
        ) -> Result<HashMap<InstanceKey, Vec<RelatedInstance>>, ProviderError> {
            if sources.contains(&self.poison) {
                return Err(ProviderError::new("boom"));
            }
            self.inner.fetch_related(sources, step)
        }

        fn fetch_property_values(
            &self,
            instances: &[InstanceKey],
            properties: &[String],
        ) -> Result<HashMap<InstanceKey, BTreeMap<String, Value>>, ProviderError> {
            self.inner.fetch_property_values(instances, properties)
        }
    }

    #[test]
    fn test_fetch_related_keeps_successful_batches() {
        let store = tree();
        let provider = FailOn {
            inner: &store,
            poison: node(2),
        };
        let traversal = Traversal::new(&provider, 1, None);

        let related = traversal
            .fetch_related(&[node(1), node(2)], &owns_child())
            .unwrap();
        assert_eq!(related.found.len(), 1);
        assert!(related.failure(&node(1)).is_none());
        assert_eq!(related.failure(&node(2)), Some(&Error::Provider("boom".into())));
        assert!(related.into_result().is_err());
    }

    #[test]
    fn test_expand_failure_fails_origin_only() {
        let mut store = tree();
        store.insert(node(10), BTreeMap::new());
        store.insert(node(11), BTreeMap::new());
        store.link("OwnsChild", node(10), node(11));
        let provider = FailOn {
            inner: &store,
            poison: node(2),
        };
        let traversal = Traversal::new(&provider, 1, None);

        let expansion = traversal
            .expand(&[node(1), node(10)], &owns_child(), DepthRange::unbounded(), 64)
            .unwrap();
        assert_eq!(ids(&expansion, 1), Vec::<u64>::new());
        assert_eq!(ids(&expansion, 10), vec![11]);
        assert_eq!(expansion.failed, vec![(node(1), Error::Provider("boom".into()))]);
    }

    #[test]
    fn test_cancelled_before_fetch() {
        let store = tree();
        let token = CancellationToken::new();
        token.cancel();
        let traversal = Traversal::new(&store, 512, Some(&token));

        let result = traversal.fetch_related(&[node(1)], &owns_child());
        assert_eq!(result.unwrap_err(), Error::Cancelled);
        assert_eq!(store.stats().related_calls(), 0);
    }
}
