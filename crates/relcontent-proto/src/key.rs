//! Instance keys.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a single instance: its concrete entity type and its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Concrete entity type name.
    pub class: String,
    /// Instance id, unique within the class.
    pub id: u64,
}

impl InstanceKey {
    /// Create a new instance key.
    pub fn new(class: impl Into<String>, id: u64) -> Self {
        Self {
            class: class.into(),
            id,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

impl FromStr for InstanceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, id) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidKey(s.to_string()))?;
        if class.is_empty() {
            return Err(Error::InvalidKey(s.to_string()));
        }
        let id = id
            .parse::<u64>()
            .map_err(|_| Error::InvalidKey(s.to_string()))?;
        Ok(Self::new(class, id))
    }
}
