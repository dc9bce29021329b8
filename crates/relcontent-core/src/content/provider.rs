//! Instance traversal provider contract.
//!
//! The provider is the only component that touches instance storage. The
//! engine hands it batches of source instances together with one resolved
//! relationship step and expects, per source, the related target instances in
//! the provider's native order.

use crate::catalog::Direction;
use relcontent_proto::{FilterExpr, InstanceKey, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// One relationship step as seen by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalStep {
    /// Accepted relationship types (the requested type and its derived types).
    pub relationship_types: BTreeSet<String>,
    pub direction: Direction,
    /// Concrete target types to return. Instances of other types are skipped.
    pub target_types: BTreeSet<String>,
    /// Filters every returned target must pass.
    pub filters: Vec<FilterExpr>,
}

impl TraversalStep {
    /// Create a step without filters.
    pub fn new(
        relationship_types: BTreeSet<String>,
        direction: Direction,
        target_types: BTreeSet<String>,
    ) -> Self {
        Self {
            relationship_types,
            direction,
            target_types,
            filters: Vec::new(),
        }
    }

    /// Add filters.
    pub fn with_filters(mut self, filters: Vec<FilterExpr>) -> Self {
        self.filters = filters;
        self
    }
}

/// A target instance reached from a source instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedInstance {
    pub key: InstanceKey,
    /// Concrete relationship type of the link.
    pub relationship: String,
    /// Relationship-own property values of the link.
    pub properties: BTreeMap<String, Value>,
}

impl RelatedInstance {
    /// Create a related instance without relationship properties.
    pub fn new(key: InstanceKey, relationship: impl Into<String>) -> Self {
        Self {
            key,
            relationship: relationship.into(),
            properties: BTreeMap::new(),
        }
    }
}

/// A provider failure for one batch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    /// Create a provider error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ProviderError> for crate::error::Error {
    fn from(e: ProviderError) -> Self {
        crate::error::Error::Provider(e.message)
    }
}

/// Source of related instances and property values.
///
/// Implementations must be order-preserving: targets for a source are
/// returned in the same order on every call.
pub trait InstanceProvider: Send + Sync {
    /// Fetch related targets for a batch of sources.
    ///
    /// Sources without targets may be absent from the result.
    fn fetch_related(
        &self,
        sources: &[InstanceKey],
        step: &TraversalStep,
    ) -> Result<HashMap<InstanceKey, Vec<RelatedInstance>>, ProviderError>;

    /// Fetch property values for a batch of instances.
    ///
    /// Missing properties are treated as null.
    fn fetch_property_values(
        &self,
        instances: &[InstanceKey],
        properties: &[String],
    ) -> Result<HashMap<InstanceKey, BTreeMap<String, Value>>, ProviderError>;

    /// List every instance of the given concrete classes.
    ///
    /// Used when content rows are all instances of some classes rather than
    /// instances handed in by the caller. Providers that cannot enumerate
    /// instances keep the default, which fails.
    fn fetch_instances_of(&self, classes: &BTreeSet<String>) -> Result<Vec<InstanceKey>, ProviderError> {
        Err(ProviderError::new(format!(
            "provider cannot list instances of {}",
            classes.iter().cloned().collect::<Vec<_>>().join(", ")
        )))
    }
}
