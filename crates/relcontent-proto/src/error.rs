//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// An instance key could not be parsed.
    #[error("invalid instance key '{0}': expected <Class>:<id>")]
    InvalidKey(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Error::Deserialization(e.to_string())
        } else {
            Error::Serialization(e.to_string())
        }
    }
}
