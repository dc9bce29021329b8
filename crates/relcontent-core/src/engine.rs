//! Content engine.
//!
//! Owns a schema, a rule set, a configuration and a descriptor cache, and
//! runs descriptor and record builds against them.

use crate::catalog::SchemaBundle;
use crate::config::EngineConfig;
use crate::content::{InstanceProvider, RecordBuilder, RecordSet, RecordsRequest};
use crate::descriptor::{
    ContentDescriptor, ContentFlags, DescriptorBuild, DescriptorBuilder, DescriptorCache,
    DescriptorFingerprint, DescriptorRequest,
};
use crate::error::Error;
use crate::rules::{ContentRuleSet, ContentSelection};
use std::sync::Arc;
use tracing::{debug, info};

/// Descriptor and record builds over one schema and rule set.
pub struct ContentEngine {
    schema: SchemaBundle,
    rules: ContentRuleSet,
    config: EngineConfig,
    cache: DescriptorCache,
}

impl ContentEngine {
    /// Create an engine. Fails if the schema is inconsistent.
    pub fn new(schema: SchemaBundle, rules: ContentRuleSet, config: EngineConfig) -> Result<Self, Error> {
        schema.validate()?;
        info!(
            ruleset = %rules.id,
            schema_version = schema.version,
            modifiers = rules.modifiers.len(),
            "content engine ready"
        );
        let cache = DescriptorCache::new(config.descriptor_cache_size);
        Ok(Self {
            schema,
            rules,
            config,
            cache,
        })
    }

    pub fn schema(&self) -> &SchemaBundle {
        &self.schema
    }

    pub fn rules(&self) -> &ContentRuleSet {
        &self.rules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// Build the descriptor for a request, or return the cached one.
    ///
    /// Instance-scoped requests consult `provider` to narrow related content.
    /// Without a provider the scope cannot narrow anything, so the request
    /// is built and cached as unscoped.
    pub fn descriptor(
        &self,
        request: &DescriptorRequest,
        provider: Option<&dyn InstanceProvider>,
    ) -> Result<Arc<DescriptorBuild>, Error> {
        let unscoped;
        let request = match (provider, &request.scope) {
            (None, Some(_)) => {
                unscoped = DescriptorRequest {
                    scope: None,
                    ..request.clone()
                };
                &unscoped
            }
            _ => request,
        };
        let fingerprint = DescriptorFingerprint::new(&self.rules.id, self.schema.version, request);
        self.cache
            .get_or_build(fingerprint, self.schema.version, || {
                let mut builder = DescriptorBuilder::new(&self.schema, &self.rules, &self.config);
                if let Some(provider) = provider {
                    builder = builder.with_provider(provider);
                }
                builder.build(request)
            })
    }

    /// Build records for a descriptor.
    pub fn records(
        &self,
        descriptor: &ContentDescriptor,
        provider: &dyn InstanceProvider,
        request: &RecordsRequest,
    ) -> Result<RecordSet, Error> {
        RecordBuilder::new(descriptor, provider, &self.config).build(request)
    }

    /// Build the descriptor for the requested instances' types, then their
    /// records.
    ///
    /// Without requested instances the content is empty, unless the rule set
    /// selects instances of classes.
    pub fn content(
        &self,
        provider: &dyn InstanceProvider,
        request: &RecordsRequest,
    ) -> Result<(Arc<DescriptorBuild>, RecordSet), Error> {
        let by_class = matches!(self.rules.selection, ContentSelection::InstancesOfClasses { .. });
        if request.instances.is_empty() && !by_class {
            debug!("no instances requested, returning empty content");
            let descriptor = ContentDescriptor::empty(
                self.rules.id.clone(),
                self.config.default_category_label.clone(),
                ContentFlags::default(),
            );
            let build = DescriptorBuild {
                descriptor,
                diagnostics: Vec::new(),
            };
            return Ok((Arc::new(build), RecordSet::default()));
        }
        let build = self.descriptor(&DescriptorRequest::for_instances(&request.instances), Some(provider))?;
        debug!(fields = build.descriptor.len(), diagnostics = build.diagnostics.len(), "descriptor ready");
        let records = self.records(&build.descriptor, provider, request)?;
        Ok((build, records))
    }

    /// Replace the schema. Cached descriptors of older versions are dropped.
    pub fn update_schema(&mut self, schema: SchemaBundle) -> Result<(), Error> {
        schema.validate()?;
        self.cache.invalidate(schema.version);
        self.schema = schema;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EndpointDef, EntityTypeDef, Multiplicity, PropertyDef, RelationshipTypeDef, ScalarType};
    use crate::content::MemoryInstanceStore;
    use crate::descriptor::FieldKind;
    use crate::rules::{ContentModifier, RelatedContentSpec, RelationshipStep};
    use relcontent_proto::{InstanceKey, RecordValue, Value};

    fn engine() -> ContentEngine {
        let schema = SchemaBundle::new(1).with_entity(
            EntityTypeDef::new("Element").with_property(PropertyDef::new("CodeValue", ScalarType::String)),
        );
        ContentEngine::new(schema, ContentRuleSet::new("rules"), EngineConfig::default()).unwrap()
    }

    fn aspect_engine(rules: ContentRuleSet) -> ContentEngine {
        let schema = SchemaBundle::new(1)
            .with_entity(EntityTypeDef::new("Element").with_property(PropertyDef::new("CodeValue", ScalarType::String)))
            .with_entity(
                EntityTypeDef::new("Aspect")
                    .abstract_type()
                    .with_property(PropertyDef::new("Prop", ScalarType::Int64)),
            )
            .with_entity(EntityTypeDef::new("Aspect1").with_base("Aspect"))
            .with_entity(EntityTypeDef::new("Aspect2").with_base("Aspect"))
            .with_relationship(RelationshipTypeDef::new(
                "ElementOwnsAspects",
                EndpointDef::new("Element", Multiplicity::ExactlyOne),
                EndpointDef::new("Aspect", Multiplicity::ZeroOrMany),
            ));
        ContentEngine::new(schema, rules, EngineConfig::default()).unwrap()
    }

    fn aspect_rules() -> ContentRuleSet {
        ContentRuleSet::new("aspects").with_modifier(
            ContentModifier::new("Element")
                .with_related(RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects")).polymorphic()),
        )
    }

    fn aspect_store() -> MemoryInstanceStore {
        MemoryInstanceStore::new()
            .with_instance(InstanceKey::new("Element", 1), [("CodeValue", "E1")])
            .with_instance(InstanceKey::new("Element", 2), [("CodeValue", "E2")])
            .with_instance(InstanceKey::new("Aspect1", 10), [("Prop", 7)])
            .with_link("ElementOwnsAspects", InstanceKey::new("Element", 1), InstanceKey::new("Aspect1", 10))
    }

    fn nested_types(build: &DescriptorBuild) -> Vec<String> {
        build
            .descriptor
            .fields()
            .iter()
            .filter_map(|f| match &f.kind {
                FieldKind::Nested(nested) => Some(nested.content_type.clone()),
                FieldKind::Properties(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_rejects_inconsistent_schema() {
        let schema = SchemaBundle::new(1).with_entity(EntityTypeDef::new("Child").with_base("Missing"));
        assert!(ContentEngine::new(schema, ContentRuleSet::new("rules"), EngineConfig::default()).is_err());
    }

    #[test]
    fn test_content_uses_cache() {
        let engine = engine();
        let store = MemoryInstanceStore::new().with_instance(InstanceKey::new("Element", 1), [("CodeValue", "E1")]);
        let request = RecordsRequest::new(vec![InstanceKey::new("Element", 1)]);

        let (build, set) = engine.content(&store, &request).unwrap();
        assert!(build.is_clean());
        let field = build.descriptor.fields().first().unwrap();
        assert_eq!(set.records[0].value(&field.name), Some(&RecordValue::Scalar(Value::from("E1"))));

        engine.content(&store, &request).unwrap();
        assert_eq!(engine.cache().stats().hits(), 1);
    }

    #[test]
    fn test_update_schema_invalidates_cache() {
        let mut engine = engine();
        engine.descriptor(&DescriptorRequest::new(["Element"]), None).unwrap();
        assert_eq!(engine.cache().len(), 1);

        let mut next = engine.schema().clone();
        next.version = 2;
        engine.update_schema(next).unwrap();
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_content_without_instances_is_empty() {
        let engine = engine();
        let store = MemoryInstanceStore::new();

        let (build, set) = engine.content(&store, &RecordsRequest::new(Vec::new())).unwrap();
        assert!(build.is_clean());
        assert!(build.descriptor.is_empty());
        assert!(build.descriptor.row_types().is_empty());
        assert_eq!(build.descriptor.ruleset_id(), "rules");
        assert!(set.is_empty());
        assert!(set.errors.is_empty());
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_scoped_request_without_provider_is_cached_unscoped() {
        let engine = aspect_engine(aspect_rules());
        let store = aspect_store();
        let request = DescriptorRequest::for_instances(&[InstanceKey::new("Element", 1)]);

        let unscoped = engine.descriptor(&request, None).unwrap();
        assert_eq!(nested_types(&unscoped), vec!["Aspect1", "Aspect2"]);
        assert_eq!(
            engine.descriptor(&DescriptorRequest::new(["Element"]), None).unwrap(),
            unscoped
        );
        assert_eq!(engine.cache().len(), 1);

        let scoped = engine.descriptor(&request, Some(&store)).unwrap();
        assert_eq!(nested_types(&scoped), vec!["Aspect1"]);
        assert_eq!(engine.cache().len(), 2);
    }

    #[test]
    fn test_content_of_classes_ignores_requested_instances() {
        let rules = ContentRuleSet::new("all-aspects").with_selection(ContentSelection::InstancesOfClasses {
            classes: vec!["Aspect".into()],
            polymorphic: true,
        });
        let engine = aspect_engine(rules);
        let store = aspect_store().with_instance(InstanceKey::new("Aspect2", 20), [("Prop", 8)]);

        let (build, set) = engine.content(&store, &RecordsRequest::new(Vec::new())).unwrap();
        assert!(build.is_clean());
        assert_eq!(
            build.descriptor.row_types().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Aspect1", "Aspect2"]
        );
        let keys: Vec<_> = set.records.iter().map(|r| r.primary_keys[0].clone()).collect();
        assert_eq!(keys, vec![InstanceKey::new("Aspect1", 10), InstanceKey::new("Aspect2", 20)]);
        let prop = build.descriptor.fields().iter().find(|f| f.label == "Prop").unwrap();
        assert_eq!(set.records[1].value(&prop.name), Some(&RecordValue::Scalar(Value::Int64(8))));
    }
}
