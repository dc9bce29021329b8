//! Path resolution.
//!
//! Expands relationship paths into concrete routes through the entity type
//! hierarchy, optionally narrowed to the types of instances that are actually
//! related.

mod path;

pub use path::{PathResolver, ResolveOptions, ResolvedPath, ResolvedRoute, ResolvedStep};
