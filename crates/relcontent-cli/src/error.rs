//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the command-line interface.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fixture: {0}")]
    Fixture(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] relcontent_core::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
