//! Sharded cache wrapper: hashes keys into `2^k` shards and dispatches
//! `get`/`put` to the selected one (spec §4.F, component F).
//!
//! Grounded in `other_examples/8c03c049_kclaka-colander__crates-colander-cache-src-sharded.rs.rs`'s
//! "hash, mask, index into a cache-line-padded shard array" shape,
//! generalized onto this crate's lockless [`Shard`] rather than a
//! lock-guarded map per shard.

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::config::{AllocatorKind, CacheConfig};
use crate::error::CacheError;
use crate::thread_id;

use super::arena::{SystemAllocator, ValueAllocator};
use super::shard::Shard;
use super::ValueHandle;

#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// A bounded, sharded, approximately-LRU concurrent cache.
///
/// `K` must be `Copy + Eq + Hash`; `V` must be `Send + Sync + PartialEq`
/// so the quiet-update fast path (spec §4.G) can compare values.
pub struct Cache<K, V, A = SystemAllocator> {
    shards: Box<[CachePadded<Shard<K, V, A>>]>,
    shard_mask: u64,
    max_threads: usize,
    hasher: std::collections::hash_map::RandomState,
}

impl<K, V> Cache<K, V, SystemAllocator>
where
    K: Copy + Eq + Hash,
    V: Send + Sync + PartialEq,
{
    /// Builds a cache with the default [`SystemAllocator`]. Rejects a config
    /// whose `allocator` field asks for anything else — a `Slab`-configured
    /// `CacheConfig` routed through here would otherwise silently get a
    /// `SystemAllocator` instead of the recycling allocator it named; callers
    /// wanting `AllocatorKind::Slab` must go through [`Cache::new_with_slab`].
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        if config.allocator != AllocatorKind::System {
            return Err(CacheError::WrongAllocatorConstructor(config.allocator));
        }
        let allocator = Arc::new(SystemAllocator);
        Self::with_allocator(config, allocator)
    }
}

impl<K, V, A> Cache<K, V, A>
where
    K: Copy + Eq + Hash,
    V: Send + Sync + PartialEq,
    A: ValueAllocator<V>,
{
    /// Builds a cache with a caller-supplied allocator, bypassing
    /// [`AllocatorKind`] entirely. Used internally when `config.allocator`
    /// is [`AllocatorKind::Slab`] and by callers with a custom backend.
    pub fn with_allocator(config: CacheConfig, allocator: Arc<A>) -> Result<Self, CacheError> {
        config.validate()?;
        let shard_capacity = config.shard_capacity();
        let ring_capacity = shard_capacity.next_power_of_two().max(64);
        let shards = (0..config.shard_count)
            .map(|_| {
                CachePadded(Shard::new(
                    shard_capacity,
                    config.max_threads,
                    ring_capacity,
                    allocator.clone(),
                ))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        tracing::info!(
            shard_count = config.shard_count,
            shard_capacity,
            max_threads = config.max_threads,
            "cache constructed"
        );
        Ok(Self {
            shards,
            shard_mask: (config.shard_count as u64) - 1,
            max_threads: config.max_threads,
            hasher: std::collections::hash_map::RandomState::new(),
        })
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V, A> {
        let hash = self.hasher.hash_one(key);
        let idx = (hash & self.shard_mask) as usize;
        &*self.shards[idx]
    }

    /// Spec §6 `cache.get(key)`.
    pub fn get(&self, key: &K) -> Option<ValueHandle<V>> {
        let thread_id = thread_id::current(self.max_threads);
        self.shard_for(key)
            .get(key, thread_id)
            .map(ValueHandle::new)
    }

    /// Spec §6 `cache.put(key, value)`.
    pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
        self.shard_for(&key).put(key, value)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of occupied slots across every shard.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Cache<K, V, super::arena::SlabAllocator<V>>
where
    K: Copy + Eq + Hash,
    V: Send + Sync + PartialEq,
{
    /// Convenience constructor matching `config.allocator ==
    /// AllocatorKind::Slab` without forcing every caller to import
    /// [`super::arena::SlabAllocator`] themselves.
    pub fn new_with_slab(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        if config.allocator != AllocatorKind::Slab {
            return Err(CacheError::WrongAllocatorConstructor(config.allocator));
        }
        let allocator = Arc::new(super::arena::SlabAllocator::default());
        Self::with_allocator(config, allocator)
    }
}
