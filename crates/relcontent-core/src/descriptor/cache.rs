//! Descriptor cache.
//!
//! Descriptor construction is pure, so builds are memoized by a fingerprint
//! of everything they depend on: the rule set, the schema version, the row
//! types, the variable bindings, the instance scope and the content flags.

use super::{DescriptorBuild, DescriptorRequest};
use crate::error::Error;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::trace;

/// Cache key of a descriptor build.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DescriptorFingerprint {
    digest: String,
}

impl DescriptorFingerprint {
    /// Fingerprint a request against a rule set and schema version.
    ///
    /// Root types and variables are hashed in sorted order. The instance
    /// scope is hashed in sorted order as well, since narrowing depends on
    /// the set of instances only.
    pub fn new(ruleset_id: &str, schema_version: u64, request: &DescriptorRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ruleset_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&schema_version.to_le_bytes());

        for ty in &request.root_types {
            hasher.update(b"type:");
            hasher.update(ty.as_bytes());
            hasher.update(&[0]);
        }
        for (name, value) in &request.variables {
            hasher.update(b"var:");
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(serde_json::to_string(value).unwrap_or_default().as_bytes());
            hasher.update(&[0]);
        }
        if let Some(scope) = &request.scope {
            let mut keys: Vec<String> = scope.iter().map(ToString::to_string).collect();
            keys.sort();
            keys.dedup();
            hasher.update(b"scope:");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(&[0]);
            }
        }
        hasher.update(b"flags:");
        hasher.update(&[request.flags.keys_only as u8, request.flags.no_fields as u8]);

        Self {
            digest: hex::encode(hasher.finalize().as_bytes()),
        }
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.digest
    }
}

/// Cached build with metadata.
#[derive(Debug)]
struct CachedDescriptor {
    build: Arc<DescriptorBuild>,
    schema_version: u64,
    hit_count: AtomicU64,
}

impl CachedDescriptor {
    fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Thread-safe descriptor cache with least-used eviction.
///
/// Entries built against an older schema version are ignored and replaced.
pub struct DescriptorCache {
    entries: RwLock<HashMap<DescriptorFingerprint, CachedDescriptor>>,
    max_entries: usize,
    current_schema_version: AtomicU64,
    stats: CacheStats,
}

impl DescriptorCache {
    /// Create a cache holding at most `max_entries` builds.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            current_schema_version: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached build for the current schema version.
    pub fn get(&self, fingerprint: &DescriptorFingerprint) -> Option<Arc<DescriptorBuild>> {
        let current_version = self.current_schema_version.load(AtomicOrdering::SeqCst);
        let guard = self.entries.read();

        if let Some(cached) = guard.get(fingerprint) {
            if cached.schema_version == current_version {
                cached.record_hit();
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                return Some(Arc::clone(&cached.build));
            }
        }

        self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
        None
    }

    /// Insert a build, evicting the least-used entry when full.
    pub fn insert(&self, fingerprint: DescriptorFingerprint, build: Arc<DescriptorBuild>, schema_version: u64) {
        let current = self.current_schema_version.load(AtomicOrdering::SeqCst);
        if schema_version > current {
            self.current_schema_version
                .store(schema_version, AtomicOrdering::SeqCst);
        }

        let mut guard = self.entries.write();
        if guard.len() >= self.max_entries && !guard.contains_key(&fingerprint) {
            self.evict_least_used(&mut guard);
        }
        guard.insert(
            fingerprint,
            CachedDescriptor {
                build,
                schema_version,
                hit_count: AtomicU64::new(0),
            },
        );
    }

    /// Return the cached build or build, cache and return a new one.
    ///
    /// Failed builds are not cached.
    pub fn get_or_build<F>(
        &self,
        fingerprint: DescriptorFingerprint,
        schema_version: u64,
        build: F,
    ) -> Result<Arc<DescriptorBuild>, Error>
    where
        F: FnOnce() -> Result<DescriptorBuild, Error>,
    {
        if self.current_schema_version.load(AtomicOrdering::SeqCst) < schema_version {
            self.invalidate(schema_version);
        }
        if let Some(cached) = self.get(&fingerprint) {
            trace!(fingerprint = fingerprint.as_str(), "descriptor cache hit");
            return Ok(cached);
        }
        trace!(fingerprint = fingerprint.as_str(), "descriptor cache miss");
        let built = Arc::new(build()?);
        self.insert(fingerprint, Arc::clone(&built), schema_version);
        Ok(built)
    }

    /// Drop every entry and move to a new schema version.
    pub fn invalidate(&self, new_schema_version: u64) {
        self.current_schema_version
            .store(new_schema_version, AtomicOrdering::SeqCst);
        self.entries.write().clear();
    }

    fn evict_least_used(&self, entries: &mut HashMap<DescriptorFingerprint, CachedDescriptor>) {
        let evict_key = entries
            .iter()
            .min_by_key(|(_, v)| v.hits())
            .map(|(k, _)| k.clone());

        if let Some(key) = evict_key {
            entries.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of cached builds.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cached builds.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
