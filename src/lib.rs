//! A bounded, sharded, approximately-LRU concurrent cache tuned for
//! read-heavy multi-core workloads: lockless reads via a per-slot
//! sequence lock, deferred recency promotion via per-reader SPSC rings,
//! and epoch-based reclamation so a held value handle never observes the
//! slot it came from being reused out from under it.
//!
//! ```
//! use flru::{Cache, CacheConfig};
//!
//! let cache: Cache<u64, String> = Cache::new(CacheConfig::default()).unwrap();
//! cache.put(1, "hello".to_string()).unwrap();
//! assert_eq!(cache.get(&1).map(|h| (*h).clone()), Some("hello".to_string()));
//! ```

pub mod config;
pub mod error;
pub mod storage;
pub mod thread_id;

pub use config::{AllocatorKind, CacheConfig};
pub use error::CacheError;
pub use storage::arena::{SlabAllocator, SystemAllocator, ValueAllocator};
pub use storage::{Cache, ValueHandle};
