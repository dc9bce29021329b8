//! Engine configuration.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default hop limit for recursive relationship steps.
pub const DEFAULT_MAX_RECURSION_HOPS: u32 = 64;

/// Default number of source instances per provider call.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Default display placeholder for values that differ across merged instances.
pub const DEFAULT_VARIES_LABEL: &str = "Varies";

/// Default label of the root category.
pub const DEFAULT_CATEGORY_LABEL: &str = "Selected Item(s)";

/// Configuration for descriptor and record building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hop limit for recursive steps. Expansion of an origin stops with a
    /// recursion overflow error once exceeded.
    pub max_recursion_hops: u32,

    /// Maximum number of source instances handed to one provider call.
    pub batch_size: usize,

    /// Display value used for merged values that differ.
    pub varies_label: String,

    /// Allow collapsing to-many related content on fields declared
    /// duplicate-sensitive.
    pub collapse_related_instances: bool,

    /// Label of the default root category.
    pub default_category_label: String,

    /// Capacity of the descriptor cache.
    pub descriptor_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_recursion_hops: DEFAULT_MAX_RECURSION_HOPS,
            batch_size: DEFAULT_BATCH_SIZE,
            varies_label: DEFAULT_VARIES_LABEL.to_string(),
            collapse_related_instances: true,
            default_category_label: DEFAULT_CATEGORY_LABEL.to_string(),
            descriptor_cache_size: 128,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recursion hop limit.
    pub fn max_recursion_hops(mut self, hops: u32) -> Self {
        self.max_recursion_hops = hops;
        self
    }

    /// Set the provider batch size. Zero is treated as one.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the "varies" display label.
    pub fn varies_label(mut self, label: impl Into<String>) -> Self {
        self.varies_label = label.into();
        self
    }

    /// Enable or disable to-many collapse.
    pub fn collapse_related_instances(mut self, enabled: bool) -> Self {
        self.collapse_related_instances = enabled;
        self
    }

    /// Set the default category label.
    pub fn default_category_label(mut self, label: impl Into<String>) -> Self {
        self.default_category_label = label.into();
        self
    }

    /// Set the descriptor cache capacity.
    pub fn descriptor_cache_size(mut self, size: usize) -> Self {
        self.descriptor_cache_size = size;
        self
    }

    /// Load a configuration from a JSON file. Missing keys take their
    /// default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidData(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Effective batch size (never zero).
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
