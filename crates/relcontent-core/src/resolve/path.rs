//! Relationship path resolver.

use crate::catalog::{Direction, EndpointDef, Multiplicity, SchemaBundle};
use crate::content::{Traversal, TraversalStep};
use crate::error::Error;
use crate::rules::{DepthRange, RelationshipPath, RelationshipStep};
use relcontent_proto::{FilterExpr, InstanceKey};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// One concrete hop of a resolved route.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    /// Relationship type named by the step.
    pub relationship: String,
    /// The relationship type and every type derived from it.
    pub relationship_types: BTreeSet<String>,
    pub direction: Direction,
    /// Concrete source type of this hop.
    pub source_type: String,
    /// Concrete target type of this hop.
    pub target_type: String,
    /// Every concrete target type the step resolves to from `source_type`.
    /// Recursive expansion passes through all of them.
    pub step_targets: BTreeSet<String>,
    /// Multiplicity of the target end for this direction.
    pub multiplicity: Multiplicity,
    pub depth: DepthRange,
    /// Instance filters on reached targets.
    pub filters: Vec<FilterExpr>,
}

impl ResolvedStep {
    /// Whether this hop can yield more than one target per source.
    pub fn is_many(&self) -> bool {
        self.multiplicity.is_many() || self.depth.is_recursive()
    }
}

/// A concrete sequence of hops from a source type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    pub steps: Vec<ResolvedStep>,
    /// Instances reached at the end of the route, for instance-scoped
    /// resolution.
    pub instances: Option<Vec<InstanceKey>>,
}

impl ResolvedRoute {
    /// Concrete type at the end of the route.
    pub fn target_type(&self) -> Option<&str> {
        self.steps.last().map(|s| s.target_type.as_str())
    }
}

/// All concrete routes of a relationship path. Empty when nothing resolves.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedPath {
    pub routes: Vec<ResolvedRoute>,
}

impl ResolvedPath {
    /// Check if the path resolved to nothing.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Concrete types at the end of the routes.
    pub fn target_types(&self) -> BTreeSet<String> {
        self.routes
            .iter()
            .filter_map(|r| r.target_type().map(str::to_string))
            .collect()
    }
}

/// Per-call options for the last step of a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'o> {
    /// Extra filter applied to the last step's targets.
    pub final_filter: Option<&'o FilterExpr>,
    /// Expand the last step's explicit target types polymorphically.
    pub polymorphic: bool,
}

/// Resolves relationship paths against a schema.
pub struct PathResolver<'a> {
    schema: &'a SchemaBundle,
    traversal: Option<Traversal<'a>>,
    max_hops: u32,
}

struct StepTargets {
    relationship_types: BTreeSet<String>,
    targets: BTreeSet<String>,
    multiplicity: Multiplicity,
}

impl<'a> PathResolver<'a> {
    /// Create a schema-only resolver.
    pub fn new(schema: &'a SchemaBundle) -> Self {
        Self {
            schema,
            traversal: None,
            max_hops: crate::config::DEFAULT_MAX_RECURSION_HOPS,
        }
    }

    /// Enable instance-scoped resolution through a traversal.
    pub fn with_traversal(mut self, traversal: Traversal<'a>, max_hops: u32) -> Self {
        self.traversal = Some(traversal);
        self.max_hops = max_hops;
        self
    }

    /// Resolve a path from a concrete source type.
    ///
    /// With `instances`, each step keeps only target types of instances
    /// actually reached from those instances of `source_type`.
    pub fn resolve(
        &self,
        path: &RelationshipPath,
        source_type: &str,
        options: ResolveOptions<'_>,
        instances: Option<&[InstanceKey]>,
    ) -> Result<ResolvedPath, Error> {
        path.validate()?;
        self.schema.entity(source_type)?;

        let scoped = match instances {
            Some(keys) => {
                if self.traversal.is_none() {
                    return Err(Error::InvalidData(
                        "instance-scoped resolution requires an instance provider".into(),
                    ));
                }
                Some(
                    keys.iter()
                        .filter(|k| k.class == source_type)
                        .cloned()
                        .collect::<Vec<_>>(),
                )
            }
            None => None,
        };

        let mut partial = vec![(Vec::<ResolvedStep>::new(), source_type.to_string(), scoped)];
        let last = path.len() - 1;

        for (index, step) in path.steps().iter().enumerate() {
            let is_last = index == last;
            let polymorphic = step.polymorphic || (is_last && options.polymorphic);
            let final_filter = if is_last { options.final_filter } else { None };

            let mut next = Vec::new();
            for (steps, current, reached) in partial {
                let Some(resolved) = self.step_targets(step, &current, polymorphic)? else {
                    trace!(
                        relationship = %step.relationship,
                        source = %current,
                        "step does not apply to source type"
                    );
                    continue;
                };
                let filters = FilterExpr::merge_optional(step.filter.as_ref(), final_filter);
                let make_step = |target: &str| ResolvedStep {
                    relationship: step.relationship.clone(),
                    relationship_types: resolved.relationship_types.clone(),
                    direction: step.direction,
                    source_type: current.clone(),
                    target_type: target.to_string(),
                    step_targets: resolved.targets.clone(),
                    multiplicity: resolved.multiplicity,
                    depth: step.depth,
                    filters: filters.clone(),
                };

                match reached {
                    None => {
                        for target in &resolved.targets {
                            let mut route = steps.clone();
                            route.push(make_step(target));
                            next.push((route, target.clone(), None));
                        }
                    }
                    Some(sources) => {
                        let probe = TraversalStep::new(
                            resolved.relationship_types.clone(),
                            step.direction,
                            resolved.targets.clone(),
                        )
                        .with_filters(filters.clone());
                        for (target, keys) in self.reach_by_type(&sources, &probe, step.depth)? {
                            let mut route = steps.clone();
                            route.push(make_step(&target));
                            next.push((route, target, Some(keys)));
                        }
                    }
                }
            }
            partial = next;
            if partial.is_empty() {
                trace!(relationship = %step.relationship, "path resolved to nothing");
                break;
            }
        }

        Ok(ResolvedPath {
            routes: partial
                .into_iter()
                .map(|(steps, _, instances)| ResolvedRoute { steps, instances })
                .collect(),
        })
    }

    /// Concrete targets of a step from a source type, or `None` when the
    /// step does not apply to the source type.
    fn step_targets(
        &self,
        step: &RelationshipStep,
        source_type: &str,
        polymorphic: bool,
    ) -> Result<Option<StepTargets>, Error> {
        let relationship_types = self.schema.derived_relationships(&step.relationship)?;
        let (source, target) = self
            .schema
            .relationship_endpoints(&step.relationship, step.direction)?;

        if !self.accepts(&source, source_type) {
            return Ok(None);
        }

        let mut targets = BTreeSet::new();
        match &step.target_types {
            Some(explicit) => {
                for ty in explicit {
                    self.schema.entity(ty)?;
                    if !self.accepts(&target, ty) {
                        trace!(target = %ty, relationship = %step.relationship, "explicit target outside relationship constraint");
                        continue;
                    }
                    if !self.schema.is_abstract(ty) {
                        targets.insert(ty.clone());
                    }
                    if polymorphic {
                        for derived in self.schema.resolve_derived_types(ty, false)? {
                            if !self.schema.is_hidden(&derived) {
                                targets.insert(derived);
                            }
                        }
                    }
                }
            }
            None => {
                for ty in &target.types {
                    if target.polymorphic {
                        for derived in self.schema.resolve_derived_types(ty, false)? {
                            if !self.schema.is_hidden(&derived) {
                                targets.insert(derived);
                            }
                        }
                    } else if !self.schema.is_abstract(ty) && !self.schema.is_hidden(ty) {
                        targets.insert(ty.clone());
                    }
                }
            }
        }

        if step.depth.is_recursive() {
            targets.retain(|t| self.accepts(&source, t));
        }

        Ok(Some(StepTargets {
            relationship_types,
            targets,
            multiplicity: target.multiplicity,
        }))
    }

    /// Check whether an endpoint accepts a type.
    fn accepts(&self, endpoint: &EndpointDef, ty: &str) -> bool {
        endpoint.types.iter().any(|c| {
            if endpoint.polymorphic {
                self.schema.is_derived_from(ty, c)
            } else {
                ty == c
            }
        })
    }

    /// Instances reached from `sources`, grouped by concrete type in
    /// first-reached order.
    fn reach_by_type(
        &self,
        sources: &[InstanceKey],
        step: &TraversalStep,
        depth: DepthRange,
    ) -> Result<Vec<(String, Vec<InstanceKey>)>, Error> {
        let Some(traversal) = &self.traversal else {
            return Ok(Vec::new());
        };
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let expansion = traversal.expand(sources, step, depth, self.max_hops)?;
        if let Some((_, error)) = expansion.failed.first() {
            return Err(error.clone());
        }
        let mut order = Vec::new();
        let mut groups: BTreeMap<String, Vec<InstanceKey>> = BTreeMap::new();
        for source in sources {
            for related in expansion.targets(source) {
                let group = groups.entry(related.key.class.clone()).or_insert_with(|| {
                    order.push(related.key.class.clone());
                    Vec::new()
                });
                if !group.contains(&related.key) {
                    group.push(related.key.clone());
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|class| groups.remove(&class).map(|keys| (class, keys)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityTypeDef, RelationshipTypeDef};
    use crate::content::MemoryInstanceStore;
    use std::collections::BTreeMap;

    fn schema() -> SchemaBundle {
        SchemaBundle::new(1)
            .with_entity(EntityTypeDef::new("Element"))
            .with_entity(EntityTypeDef::new("Aspect").abstract_type())
            .with_entity(EntityTypeDef::new("Aspect1").with_base("Aspect"))
            .with_entity(EntityTypeDef::new("Aspect2").with_base("Aspect"))
            .with_entity(EntityTypeDef::new("HiddenAspect").with_base("Aspect").hidden())
            .with_entity(EntityTypeDef::new("Model"))
            .with_relationship(RelationshipTypeDef::new(
                "ElementOwnsAspects",
                EndpointDef::new("Element", Multiplicity::ExactlyOne),
                EndpointDef::new("Aspect", Multiplicity::ZeroOrMany),
            ))
            .with_relationship(RelationshipTypeDef::new(
                "ModelContainsElements",
                EndpointDef::new("Model", Multiplicity::ExactlyOne),
                EndpointDef::new("Element", Multiplicity::ZeroOrMany),
            ))
    }

    fn owns() -> RelationshipPath {
        RelationshipPath::single(RelationshipStep::forward("ElementOwnsAspects"))
    }

    #[test]
    fn test_wildcard_skips_hidden_and_abstract() {
        let schema = schema();
        let resolver = PathResolver::new(&schema);

        let resolved = resolver
            .resolve(&owns(), "Element", ResolveOptions::default(), None)
            .unwrap();
        assert_eq!(
            resolved.target_types().into_iter().collect::<Vec<_>>(),
            vec!["Aspect1", "Aspect2"]
        );
        let step = &resolved.routes[0].steps[0];
        assert!(step.is_many());
        assert_eq!(step.relationship_types.len(), 1);
    }

    #[test]
    fn test_explicit_hidden_target_kept() {
        let schema = schema();
        let resolver = PathResolver::new(&schema);
        let path = RelationshipPath::single(
            RelationshipStep::forward("ElementOwnsAspects").to_types(["HiddenAspect"]),
        );

        let resolved = resolver
            .resolve(&path, "Element", ResolveOptions::default(), None)
            .unwrap();
        assert_eq!(resolved.routes.len(), 1);
        assert_eq!(resolved.routes[0].target_type(), Some("HiddenAspect"));
    }

    #[test]
    fn test_explicit_polymorphic_target() {
        let schema = schema();
        let resolver = PathResolver::new(&schema);
        let path = RelationshipPath::single(
            RelationshipStep::forward("ElementOwnsAspects").to_types(["Aspect"]),
        );

        let exact = resolver
            .resolve(&path, "Element", ResolveOptions::default(), None)
            .unwrap();
        assert!(exact.is_empty());

        let options = ResolveOptions {
            polymorphic: true,
            ..Default::default()
        };
        let poly = resolver.resolve(&path, "Element", options, None).unwrap();
        assert_eq!(poly.target_types().len(), 2);
    }

    #[test]
    fn test_incompatible_source_is_empty() {
        let schema = schema();
        let resolver = PathResolver::new(&schema);

        let resolved = resolver
            .resolve(&owns(), "Model", ResolveOptions::default(), None)
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_multi_step_backward() {
        let schema = schema();
        let resolver = PathResolver::new(&schema);
        let path = RelationshipPath::single(RelationshipStep::backward("ElementOwnsAspects"))
            .then(RelationshipStep::backward("ModelContainsElements"));

        let resolved = resolver
            .resolve(&path, "Aspect1", ResolveOptions::default(), None)
            .unwrap();
        assert_eq!(resolved.routes.len(), 1);
        let route = &resolved.routes[0];
        assert_eq!(route.steps[0].target_type, "Element");
        assert!(!route.steps[0].is_many());
        assert_eq!(route.target_type(), Some("Model"));
    }

    #[test]
    fn test_unknown_relationship() {
        let schema = schema();
        let resolver = PathResolver::new(&schema);
        let path = RelationshipPath::single(RelationshipStep::forward("Nope"));

        let err = resolver
            .resolve(&path, "Element", ResolveOptions::default(), None)
            .unwrap_err();
        assert_eq!(err, Error::UnknownRelationship("Nope".into()));
    }

    #[test]
    fn test_instance_scoped_resolution() {
        let schema = schema();
        let e1 = InstanceKey::new("Element", 1);
        let e2 = InstanceKey::new("Element", 2);
        let store = MemoryInstanceStore::new()
            .with_instance(e1.clone(), BTreeMap::<String, relcontent_proto::Value>::new())
            .with_instance(InstanceKey::new("Aspect2", 20), [("Prop", 456)])
            .with_link("ElementOwnsAspects", e2.clone(), InstanceKey::new("Aspect2", 20));
        let resolver = PathResolver::new(&schema).with_traversal(Traversal::new(&store, 512, None), 64);

        let resolved = resolver
            .resolve(&owns(), "Element", ResolveOptions::default(), Some(&[e1.clone(), e2]))
            .unwrap();
        assert_eq!(resolved.routes.len(), 1);
        assert_eq!(resolved.routes[0].target_type(), Some("Aspect2"));
        assert_eq!(
            resolved.routes[0].instances,
            Some(vec![InstanceKey::new("Aspect2", 20)])
        );

        let none = resolver
            .resolve(&owns(), "Element", ResolveOptions::default(), Some(&[e1]))
            .unwrap();
        assert!(none.is_empty());
    }
}
