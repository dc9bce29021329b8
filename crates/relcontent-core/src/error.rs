//! Core error types.

use thiserror::Error;

/// Engine errors.
///
/// Every variant carries owned data so errors can be cloned into
/// descriptor diagnostics and cached build outcomes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A specification names an entity type absent from the schema.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A specification names a relationship type absent from the schema.
    #[error("unknown relationship type: {0}")]
    UnknownRelationship(String),

    /// A selector names a property the target type does not have.
    #[error("unknown property {property} on {entity}")]
    UnknownProperty { entity: String, property: String },

    /// A selector references a category the rule set does not define.
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// A relationship path is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The instance provider failed.
    #[error("traversal failure: {0}")]
    Provider(String),

    /// A recursive step did not terminate within the hop limit.
    #[error("recursion overflow from {origin} after {max_hops} hops")]
    RecursionOverflow { origin: String, max_hops: u32 },

    /// The build was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] relcontent_proto::Error),
}

impl Error {
    /// Whether this error is a schema inconsistency, reported per
    /// specification rather than aborting the build.
    pub fn is_schema_inconsistency(&self) -> bool {
        matches!(
            self,
            Error::UnknownEntityType(_)
                | Error::UnknownRelationship(_)
                | Error::UnknownProperty { .. }
                | Error::UnknownCategory(_)
                | Error::InvalidPath(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
