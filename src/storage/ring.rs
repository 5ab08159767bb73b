//! Bounded SPSC trace ring (spec §4.A, component A).
//!
//! One ring per reader thread id, per shard. The reader is the sole
//! producer; the shard writer holding the shard lock is the sole consumer.
//! `push`/`pop` are wait-free and never block: a full ring drops the push,
//! an empty ring fails the pop. Dropped traces are a correctness-neutral
//! loss of recency fidelity, never an error (spec §4.A "Failure semantics").
//!
//! Grounded in the pack's SPSC ring references (cached opposite-index reads
//! to avoid a cross-core atomic load on the fast path, producer/consumer
//! indices on separate cache lines): see e.g. the ring buffer in
//! `other_examples/83792f40_debasishg-ringmpsc-rs__src-ring.rs.rs`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A recency hint: "slot `idx` was read while its generation was `gen`".
///
/// Honored by a writer iff the slot is still `Occupied` with the same
/// `gen` at drain time (spec §3 invariant 5); otherwise silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOp {
    pub idx: u32,
    pub gen: u32,
}

/// 64-byte alignment keeps the producer's and consumer's hot fields off
/// each other's cache line.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Single-producer single-consumer bounded ring of [`UpdateOp`].
pub struct Ring {
    mask: usize,
    buf: Box<[UnsafeCell<MaybeUninit<UpdateOp>>]>,

    // Producer-owned.
    tail: CachePadded<AtomicUsize>,
    cached_head: CachePadded<UnsafeCell<usize>>,

    // Consumer-owned.
    head: CachePadded<AtomicUsize>,
    cached_tail: CachePadded<UnsafeCell<usize>>,
}

// Safety: all cross-thread access goes through the atomic head/tail
// handshake; `buf` slots are written by the producer before the tail
// store (Release) and read by the consumer after the head load
// (Acquire), so there is never a concurrent read/write of the same slot.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// `capacity` must be a power of two and is fixed for the ring's life.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity > 0);
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            mask: capacity - 1,
            buf,
            tail: CachePadded(AtomicUsize::new(0)),
            cached_head: CachePadded(UnsafeCell::new(0)),
            head: CachePadded(AtomicUsize::new(0)),
            cached_tail: CachePadded(UnsafeCell::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Pushes a trace. Returns `false` (a legitimate drop, not an error) if
    /// the ring is full. Must only be called by the ring's single producer.
    pub fn push(&self, item: UpdateOp) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);

        // SAFETY: only the producer reads/writes `cached_head`.
        let cached_head = unsafe { *self.cached_head.get() };
        if tail.wrapping_sub(cached_head) >= self.capacity() {
            let head = self.head.load(Ordering::Acquire);
            unsafe {
                *self.cached_head.get() = head;
            }
            if tail.wrapping_sub(head) >= self.capacity() {
                return false;
            }
        }

        let idx = tail & self.mask;
        // SAFETY: slot `idx` is not visible to the consumer until the
        // Release store to `tail` below; only the producer writes here.
        unsafe {
            (*self.buf[idx].get()).write(item);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pops the oldest pending trace. Returns `false` if the ring is empty.
    /// Must only be called by the ring's single consumer.
    pub fn pop(&self) -> Option<UpdateOp> {
        let head = self.head.load(Ordering::Relaxed);

        // SAFETY: only the consumer reads/writes `cached_tail`.
        let cached_tail = unsafe { *self.cached_tail.get() };
        if head == cached_tail {
            let tail = self.tail.load(Ordering::Acquire);
            unsafe {
                *self.cached_tail.get() = tail;
            }
            if head == tail {
                return None;
            }
        }

        let idx = head & self.mask;
        // SAFETY: the Acquire load above (or the relaxed load when the
        // fast-path cache already proved non-empty) synchronizes with the
        // producer's Release store, so this slot's write has landed.
        let item = unsafe { (*self.buf[idx].get()).assume_init() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }
}
