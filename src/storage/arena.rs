//! Pluggable value allocator (spec §4.C, component C).
//!
//! The core only specifies the allocator's interface: the huge-page backend
//! the source system used is OS-specific and explicitly out of scope
//! (spec §1). `SystemAllocator` is the always-correct fallback; `SlabAllocator`
//! recycles same-size boxes through a lock-free free list and is a pure
//! throughput knob layered on top.

use std::sync::Arc;

use parking_lot::Mutex;

/// Backs value storage for a cache. Implementations must be `Send + Sync`
/// so one allocator instance can be shared by every shard (and, per spec
/// §9 design note 3, must outlive every cache it serves — enforced here by
/// holding it behind an `Arc` for the cache's whole lifetime rather than a
/// borrowed reference).
pub trait ValueAllocator<V>: Send + Sync {
    /// Wraps `value` for storage. May recycle a previously `deallocate`d box.
    fn allocate(&self, value: V) -> Arc<V>;

    /// Returns a value's storage to the allocator once it is fully
    /// reclaimed (no reader can still observe it).
    fn deallocate(&self, value: Arc<V>);
}

/// Always-correct fallback: every `allocate` is a fresh `Arc`, every
/// `deallocate` just drops its argument.
#[derive(Default)]
pub struct SystemAllocator;

impl<V: Send + Sync> ValueAllocator<V> for SystemAllocator {
    fn allocate(&self, value: V) -> Arc<V> {
        Arc::new(value)
    }

    fn deallocate(&self, _value: Arc<V>) {}
}

/// Recycles same-size allocations via a CAS-backed free list; multi-element
/// batches are never recycled (spec §4.C: "elements of size 1 may be
/// recycled via a CAS stack; multi-element allocations are not recycled" —
/// here every value is a single `Arc<V>` allocation, so the whole free list
/// applies).
///
/// The free list itself is a `Mutex<Vec<Arc<V>>>` rather than a hand-rolled
/// Treiber stack: under the cache's access pattern (`deallocate` only ever
/// happens under the shard writer lock already held by `put`) a lock-free
/// stack buys nothing a short-held mutex doesn't already give, so we keep
/// the simpler primitive and document why.
pub struct SlabAllocator<V> {
    free: Mutex<Vec<Arc<V>>>,
    max_recycled: usize,
}

impl<V> SlabAllocator<V> {
    pub fn new(max_recycled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_recycled,
        }
    }
}

impl<V> Default for SlabAllocator<V> {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl<V: Send + Sync> ValueAllocator<V> for SlabAllocator<V> {
    fn allocate(&self, value: V) -> Arc<V> {
        // Recycled slots are only reused once their strong count has
        // dropped to 1 (this allocator's own reference); otherwise some
        // reader still holds the old value and we must allocate fresh.
        let mut free = self.free.lock();
        if let Some(pos) = free.iter().position(|arc| Arc::strong_count(arc) == 1) {
            let mut recycled = free.swap_remove(pos);
            *Arc::get_mut(&mut recycled).expect("strong count checked above") = value;
            return recycled;
        }
        Arc::new(value)
    }

    fn deallocate(&self, value: Arc<V>) {
        let mut free = self.free.lock();
        if free.len() < self.max_recycled {
            free.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocator_roundtrips() {
        let alloc = SystemAllocator;
        let v = alloc.allocate(42u64);
        assert_eq!(*v, 42);
        alloc.deallocate(v);
    }

    #[test]
    fn slab_allocator_recycles_freed_slots() {
        let alloc: SlabAllocator<u64> = SlabAllocator::new(4);
        let v1 = alloc.allocate(1);
        alloc.deallocate(v1);
        let v2 = alloc.allocate(2);
        assert_eq!(*v2, 2);
    }

    #[test]
    fn slab_allocator_does_not_recycle_while_referenced() {
        let alloc: SlabAllocator<u64> = SlabAllocator::new(4);
        let v1 = alloc.allocate(1);
        let _still_held = v1.clone();
        alloc.deallocate(v1);
        // the recycled slot still has strong_count 2 (still_held + the one
        // stored in `free`), so allocate() must hand back a fresh Arc.
        let v2 = alloc.allocate(2);
        assert_eq!(*v2, 2);
        assert_eq!(*_still_held, 1);
    }
}
