//! Cache configuration: capacity, shard count, thread cap.
//!
//! Mirrors the teacher's `config` module in shape (a `Deserialize`-able
//! struct plus a `load` helper for reading it from a YAML file) but scoped
//! to exactly the knobs the engine needs: everything is fixed at
//! construction, there is no live-reload and no environment/rules layer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, ConfigLoadError};

/// Per-shard allocator selection.
///
/// `System` always works; `Slab` recycles same-size value boxes through a
/// lock-free free list and is a pure performance knob (spec §4.C: "Correctness
/// does not depend on the huge-page fast path; any competent general-purpose
/// allocator suffices").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    System,
    Slab,
}

impl Default for AllocatorKind {
    fn default() -> Self {
        AllocatorKind::System
    }
}

/// Construction-time configuration for a [`crate::Cache`].
///
/// `capacity` is the *total* capacity across all shards; each shard gets
/// `capacity / shard_count` slots, which must be at least 64 (§4.F).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub shard_count: usize,
    pub max_threads: usize,
    #[serde(default)]
    pub allocator: AllocatorKind,
}

impl Default for CacheConfig {
    /// The trio recommended by spec §4.G: `(4096, 32, 32)`.
    fn default() -> Self {
        Self {
            capacity: 4096,
            shard_count: 32,
            max_threads: 32,
            allocator: AllocatorKind::System,
        }
    }
}

impl CacheConfig {
    pub fn new(capacity: usize, shard_count: usize, max_threads: usize) -> Self {
        Self {
            capacity,
            shard_count,
            max_threads,
            allocator: AllocatorKind::System,
        }
    }

    pub fn with_allocator(mut self, allocator: AllocatorKind) -> Self {
        self.allocator = allocator;
        self
    }

    /// Loads configuration from a YAML file, for callers who want to tune
    /// the cache from a deployment manifest instead of recompiling.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let to_load_err = |source: ConfigLoadError| CacheError::ConfigLoad {
            path: path.display().to_string(),
            source,
        };
        let data = std::fs::read_to_string(path).map_err(ConfigLoadError::Io).map_err(to_load_err)?;
        serde_yaml::from_str(&data).map_err(ConfigLoadError::Parse).map_err(to_load_err)
    }

    /// `capacity / shard_count`, the per-shard table size budget.
    pub fn shard_capacity(&self) -> usize {
        self.capacity / self.shard_count
    }

    /// Validates the invariants required by spec §3/§4.F/§4.G:
    /// capacity, shard_count and max_threads are powers of two, shard
    /// capacity is at least 64, and max_threads fits in one dirty-bitmap word.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.capacity.is_power_of_two()
            || !self.shard_count.is_power_of_two()
            || !self.max_threads.is_power_of_two()
        {
            let err = CacheError::NotPowerOfTwo {
                capacity: self.capacity,
                shard_count: self.shard_count,
                max_threads: self.max_threads,
            };
            tracing::warn!(%err, "rejecting cache config");
            return Err(err);
        }
        if self.max_threads > 64 {
            let err = CacheError::TooManyThreads(self.max_threads);
            tracing::warn!(%err, "rejecting cache config");
            return Err(err);
        }
        let shard_capacity = self.shard_capacity();
        if shard_capacity < 64 {
            let err = CacheError::ShardCapacityTooSmall(shard_capacity);
            tracing::warn!(%err, "rejecting cache config");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_trio_validates() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two() {
        let cfg = CacheConfig::new(4000, 32, 32);
        assert!(matches!(cfg.validate(), Err(CacheError::NotPowerOfTwo { .. })));
    }

    #[test]
    fn rejects_too_many_threads() {
        let cfg = CacheConfig::new(4096, 32, 128);
        assert!(matches!(
            cfg.validate(),
            Err(CacheError::NotPowerOfTwo { .. } | CacheError::TooManyThreads(_))
        ));
    }

    #[test]
    fn rejects_small_shard_capacity() {
        let cfg = CacheConfig::new(1024, 32, 32);
        assert!(matches!(cfg.validate(), Err(CacheError::ShardCapacityTooSmall(32))));
    }

    #[test]
    fn load_reports_a_distinct_error_for_a_missing_file_not_allocation_failure() {
        let err = CacheConfig::load("/nonexistent/path/to/flru.yaml").unwrap_err();
        match err {
            CacheError::ConfigLoad { source, .. } => {
                assert!(matches!(source, crate::error::ConfigLoadError::Io(_)));
            }
            other => panic!("expected ConfigLoad, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_a_distinct_error_for_malformed_yaml() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("flru-config-test-{:?}.yaml", std::thread::current().id()));
        std::fs::write(&path, b"not: [valid, cache, config").unwrap();
        let err = CacheConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        match err {
            CacheError::ConfigLoad { source, .. } => {
                assert!(matches!(source, crate::error::ConfigLoadError::Parse(_)));
            }
            other => panic!("expected ConfigLoad, got {other:?}"),
        }
    }
}
