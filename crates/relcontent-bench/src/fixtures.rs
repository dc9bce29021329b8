//! Test data generation for benchmarks.
//!
//! Data is generated from a fixed seed so runs are comparable.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relcontent_core::catalog::{
    EndpointDef, EntityTypeDef, Multiplicity, PropertyDef, RelationshipTypeDef, ScalarType, SchemaBundle,
};
use relcontent_core::content::MemoryInstanceStore;
use relcontent_core::rules::{ContentModifier, ContentRuleSet, RelatedContentSpec, RelationshipStep};
use relcontent_proto::{InstanceKey, Value};
use std::collections::BTreeMap;

/// Number of concrete aspect subtypes in the generated schema.
pub const ASPECT_TYPES: usize = 4;

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// Tiny scale: 10 elements. Use for quick iteration.
    Tiny,
    /// Small scale: 100 elements
    Small,
    /// Medium scale: 2,000 elements
    #[default]
    Medium,
}

impl Scale {
    /// Number of root elements.
    pub fn count(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 2_000,
        }
    }

    /// Aspects owned by each element.
    pub fn aspects_per_element(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small => 3,
            Scale::Medium => 5,
        }
    }

    /// Child elements owned by each element.
    pub fn children_per_element(&self) -> usize {
        match self {
            Scale::Tiny => 1,
            Scale::Small => 2,
            Scale::Medium => 2,
        }
    }
}

/// A generated schema, rule set and instance store.
pub struct Dataset {
    pub schema: SchemaBundle,
    pub rules: ContentRuleSet,
    pub store: MemoryInstanceStore,
    /// Root elements, in generation order.
    pub elements: Vec<InstanceKey>,
}

/// Element and aspect schema with a child-element hierarchy.
pub fn schema() -> SchemaBundle {
    let mut schema = SchemaBundle::new(1)
        .with_entity(
            EntityTypeDef::new("Element")
                .with_property(PropertyDef::new("CodeValue", ScalarType::String))
                .with_property(PropertyDef::new("Rank", ScalarType::Int64)),
        )
        .with_entity(EntityTypeDef::new("Aspect").abstract_type());
    for i in 0..ASPECT_TYPES {
        schema = schema.with_entity(
            EntityTypeDef::new(aspect_type(i))
                .with_base("Aspect")
                .with_property(PropertyDef::new("Weight", ScalarType::Float64))
                .with_property(PropertyDef::new("Tag", ScalarType::String)),
        );
    }
    schema
        .with_relationship(RelationshipTypeDef::new(
            "ElementOwnsAspects",
            EndpointDef::new("Element", Multiplicity::ExactlyOne),
            EndpointDef::new("Aspect", Multiplicity::ZeroOrMany),
        ))
        .with_relationship(RelationshipTypeDef::new(
            "ElementOwnsChildElements",
            EndpointDef::new("Element", Multiplicity::ZeroOrOne),
            EndpointDef::new("Element", Multiplicity::ZeroOrMany),
        ))
}

/// Rules pulling every aspect subtype and the direct children of an element.
pub fn rules() -> ContentRuleSet {
    ContentRuleSet::new("bench").with_modifier(
        ContentModifier::new("Element")
            .with_related(RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects")).polymorphic())
            .with_related(RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsChildElements"))),
    )
}

/// Generate a dataset with a fixed seed.
pub fn generate(scale: Scale) -> Dataset {
    generate_with_seed(scale, 42)
}

/// Generate a dataset with the given seed.
pub fn generate_with_seed(scale: Scale, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = MemoryInstanceStore::new();
    let mut elements = Vec::with_capacity(scale.count());
    let mut next_id = 1u64;

    for _ in 0..scale.count() {
        let element = InstanceKey::new("Element", next_id);
        next_id += 1;
        store.insert(element.clone(), element_properties(&mut rng));

        for _ in 0..scale.aspects_per_element() {
            let aspect = InstanceKey::new(aspect_type(rng.gen_range(0..ASPECT_TYPES)), next_id);
            next_id += 1;
            store.insert(aspect.clone(), aspect_properties(&mut rng));
            store.link("ElementOwnsAspects", element.clone(), aspect);
        }

        for _ in 0..scale.children_per_element() {
            let child = InstanceKey::new("Element", next_id);
            next_id += 1;
            store.insert(child.clone(), element_properties(&mut rng));
            store.link("ElementOwnsChildElements", element.clone(), child);
        }

        elements.push(element);
    }

    Dataset {
        schema: schema(),
        rules: rules(),
        store,
        elements,
    }
}

fn aspect_type(index: usize) -> String {
    format!("Aspect{}", index + 1)
}

fn random_string(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

fn element_properties(rng: &mut StdRng) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    props.insert("CodeValue".to_string(), Value::String(random_string(rng, 8)));
    props.insert("Rank".to_string(), Value::Int64(rng.gen_range(0..10)));
    props
}

fn aspect_properties(rng: &mut StdRng) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    props.insert("Weight".to_string(), Value::Float64(rng.gen_range(0.0..100.0)));
    // Few distinct tags so merged records keep some equal values.
    let tag = ["red", "green", "blue"][rng.gen_range(0..3)];
    props.insert("Tag".to_string(), Value::from(tag));
    props
}
