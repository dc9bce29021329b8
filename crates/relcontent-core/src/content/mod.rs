//! Content records.
//!
//! Everything that touches instances lives here: the provider contract and
//! its in-memory implementation, batched traversal, the record builder that
//! realizes a descriptor for a set of instances, and the merge engine.

mod builder;
mod cancel;
mod filter;
mod memory;
mod merge;
mod provider;
mod traversal;

pub use builder::{RecordBuilder, RecordSet, RecordsRequest};
pub use cancel::CancellationToken;
pub use filter::{extract_filter_fields, FilterEvaluator};
pub use memory::{MemoryInstanceStore, ProviderStats};
pub use merge::MergeEngine;
pub use provider::{InstanceProvider, ProviderError, RelatedInstance, TraversalStep};
pub use traversal::{Batched, Expansion, Traversal};
