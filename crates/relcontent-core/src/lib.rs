//! relcontent core - schema model, path resolution, content descriptors and
//! record building.
//!
//! The engine turns declarative content rules into a deduplicated tree of
//! display fields (a [`ContentDescriptor`]) and realizes that tree for
//! concrete instances as [`ContentRecord`](relcontent_proto::ContentRecord)s,
//! fetching related instances and property values through an
//! [`InstanceProvider`].
//!
//! # Modules
//!
//! - [`catalog`] - Entity and relationship types
//! - [`rules`] - Content rules
//! - [`resolve`] - Relationship path resolution against the schema
//! - [`descriptor`] - Field tree construction and caching
//! - [`content`] - Instance providers, record building and merging
//! - [`engine`] - Schema, rules and cache bundled into one entry point

pub mod catalog;
pub mod config;
pub mod content;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod resolve;
pub mod rules;

pub use catalog::{
    Direction, EndpointDef, EntityTypeDef, Multiplicity, PropertyDef, RelationshipTypeDef,
    ScalarType, SchemaBundle,
};
pub use config::EngineConfig;
pub use content::{
    CancellationToken, InstanceProvider, MemoryInstanceStore, MergeEngine, ProviderError,
    RecordBuilder, RecordSet, RecordsRequest, RelatedInstance, TraversalStep,
};
pub use descriptor::{
    ContentDescriptor, ContentFlags, DescriptorBuild, DescriptorBuilder, DescriptorCache,
    DescriptorFingerprint, DescriptorRequest, Diagnostic, Field, FieldId, FieldKind, RowSource,
};
pub use engine::ContentEngine;
pub use error::Error;
pub use resolve::{PathResolver, ResolveOptions, ResolvedPath};
pub use rules::{
    CategorySpec, ContentModifier, ContentRuleSet, ContentSelection, DepthRange, PropertyOverride,
    PropertySelector, RelatedContentSpec, RelationshipMeaning, RelationshipPath, RelationshipStep,
    RuleCondition,
};

/// Re-export protocol types.
pub use relcontent_proto as proto;
