//! relcontent exchange types.
//!
//! This crate defines the values and records exchanged between the relcontent
//! engine, its instance providers and its callers. Everything here derives
//! `serde::Serialize` and `serde::Deserialize`; JSON is the externalization
//! format.
//!
//! # Modules
//!
//! - [`value`] - Scalar property values
//! - [`key`] - Instance keys
//! - [`filter`] - Instance filter expressions evaluated by providers
//! - [`record`] - Content records, nested items and record errors
//! - [`error`] - Protocol error types

pub mod error;
pub mod filter;
pub mod key;
pub mod record;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use filter::{FilterExpr, SimpleFilter};
pub use key::InstanceKey;
pub use record::{ContentRecord, DisplayValue, NestedItem, RecordError, RecordValue};
pub use value::Value;

/// Version of the externalized record format.
///
/// Incremented when the JSON shape of [`ContentRecord`] changes in an
/// incompatible way.
pub const RECORD_FORMAT_VERSION: u32 = 1;
