//! Epoch-based reclamation registry (spec §4.B, component B).
//!
//! Readers never take a lock to publish that they're "inside" a critical
//! section — they stamp the current global epoch into their own slot and
//! clear it on exit. Writers use [`EpochManager::min_active`] to learn the
//! oldest epoch any reader might still be observing, and only then destroy
//! values that were retired at an older epoch (spec §3 Lifecycle, §4.B).
//!
//! Built directly on `std::sync::atomic` rather than pulled from an
//! off-the-shelf epoch-reclamation crate: this is the algorithm the spec
//! asks to be implemented, not ambient plumbing around it.

use std::sync::atomic::{AtomicU64, Ordering};

#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Per-shard epoch registry. `0` means "not entered"; any nonzero value is
/// the global epoch the thread observed on entry.
pub struct EpochManager {
    global: AtomicU64,
    slots: Box<[CachePadded<AtomicU64>]>,
}

impl EpochManager {
    /// `max_threads` reader slots, one per possible thread id.
    pub fn new(max_threads: usize) -> Self {
        let slots = (0..max_threads)
            .map(|_| CachePadded(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            global: AtomicU64::new(1),
            slots,
        }
    }

    /// Marks thread `thread_id` as active at the current global epoch.
    /// The returned guard clears the slot on drop, so a panicking reader
    /// still leaves cleanly.
    pub fn enter(&self, thread_id: usize) -> EpochGuard<'_> {
        let epoch = self.global.load(Ordering::Acquire);
        self.slots[thread_id].store(epoch, Ordering::Release);
        EpochGuard {
            manager: self,
            thread_id,
        }
    }

    fn leave(&self, thread_id: usize) {
        self.slots[thread_id].store(0, Ordering::Release);
    }

    /// Atomically advances the global epoch, returning the previous value.
    pub fn bump(&self) -> u64 {
        self.global.fetch_add(1, Ordering::AcqRel)
    }

    /// The smallest epoch any reader slot is currently stamped with, or the
    /// current global epoch if every slot is idle (0).
    pub fn min_active(&self) -> u64 {
        let mut min = u64::MAX;
        for slot in self.slots.iter() {
            let e = slot.load(Ordering::Acquire);
            if e != 0 && e < min {
                min = e;
            }
        }
        if min == u64::MAX {
            self.global.load(Ordering::Acquire)
        } else {
            min
        }
    }

    pub fn current(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }
}

/// RAII guard returned by [`EpochManager::enter`]; clears the reader's
/// epoch slot when dropped.
pub struct EpochGuard<'a> {
    manager: &'a EpochManager,
    thread_id: usize,
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.manager.leave(self.thread_id);
    }
}
