//! Error types surfaced by the cache's public API.

use crate::config::AllocatorKind;

/// Errors returned by [`crate::Cache::new`] and [`crate::Cache::put`].
///
/// Everything else the engine can hit internally (a probe that walks past
/// the table size, a slot whose state/gen pair desynced, a thread id handed
/// in out of range) is a corrupted-invariant bug, not a recoverable error,
/// and is reported via `panic!`/`debug_assert!` at the point of discovery
/// per the design's error-handling section rather than through this enum.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("shard capacity must be >= 64, got {0}")]
    ShardCapacityTooSmall(usize),

    #[error("capacity, shard_count and max_threads must all be powers of two (capacity={capacity}, shard_count={shard_count}, max_threads={max_threads})")]
    NotPowerOfTwo {
        capacity: usize,
        shard_count: usize,
        max_threads: usize,
    },

    #[error("max_threads must be <= 64 so the dirty bitmap fits in one word, got {0}")]
    TooManyThreads(usize),

    #[error("value allocation failed")]
    AllocationFailed,

    #[error("config.allocator is {0:?}, which this constructor does not build; use Cache::new for AllocatorKind::System or Cache::new_with_slab for AllocatorKind::Slab")]
    WrongAllocatorConstructor(AllocatorKind),

    #[error("failed to load cache config from {path}: {source}")]
    ConfigLoad {
        path: String,
        #[source]
        source: ConfigLoadError,
    },
}

/// The two ways [`crate::CacheConfig::load`] can fail, kept distinct from
/// [`CacheError::AllocationFailed`] so a malformed config file is never
/// reported as an allocator problem.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}
