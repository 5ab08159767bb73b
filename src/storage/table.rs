//! Linked flat map: an open-addressed, linearly-probed table with intrusive
//! LRU threading and a per-slot sequence lock (spec §4.D, component D).
//!
//! Grounded in the teacher's `db::storage::lru::LRUList` (an intrusive
//! doubly-linked list manipulated only by the writer, `unsafe impl
//! Send + Sync` documented by "nodes are only mutated under the writer's
//! lock") generalized from a separate `HashMap<K, NodePtr>` + raw-pointer
//! list into one flat slot array that carries both the hash-table entry
//! and its list links, per spec §9's "intrusive LRU list inside a flat
//! table" design note.
//!
//! The key is stored in a [`crossbeam_utils::atomic::AtomicCell`] rather
//! than a plain cell: even though every read is gated by the `gen`
//! sequence lock and a torn logical read is simply discarded, an
//! unsynchronized plain read racing the writer's plain write would still
//! be a data race at the language level. `AtomicCell` removes that
//! language-level race regardless of `K`'s size, which is exactly the
//! "atomic-reference load" spec §4.D/§9 calls for. The value is stored in
//! an [`arc_swap::ArcSwapOption`], giving readers a wait-free clone of the
//! current `Arc<V>` (the "shared-ownership value handle" of spec §3) with
//! its own internal generation counter backing the swap.

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_utils::atomic::AtomicCell;

/// Sentinel index meaning "no slot" in the intrusive prev/next/head/tail
/// links (spec §3 Slot: "slot indices (or a sentinel null index)").
pub const NULL: u32 = u32::MAX;

const EMPTY: u8 = 0;
const OCCUPIED: u8 = 1;
const DELETED: u8 = 2;

struct Slot<K, V> {
    state: AtomicU8,
    /// Even: stable, readable. Odd: a writer is mid-mutation (spec §3).
    gen: AtomicU32,
    key: AtomicCell<Option<K>>,
    value: ArcSwapOption<V>,
    prev: std::cell::UnsafeCell<u32>,
    next: std::cell::UnsafeCell<u32>,
}

impl<K, V> Slot<K, V> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            gen: AtomicU32::new(0),
            key: AtomicCell::new(None),
            value: ArcSwapOption::from(None),
            prev: std::cell::UnsafeCell::new(NULL),
            next: std::cell::UnsafeCell::new(NULL),
        }
    }
}

// SAFETY: `prev`/`next` are only ever read or written by the shard writer
// while holding the shard's spin lock (spec §4.D "Linked-list discipline:
// head and tail are plain fields because they are mutated only by the
// shard writer"). All other fields are independently thread-safe atomics.
unsafe impl<K: Send, V: Send + Sync> Sync for Slot<K, V> {}

/// Result of a writer-side probe ([`Table::lookup`]).
pub enum Lookup {
    Hit { idx: usize, gen: u32 },
    Miss { insert_hint: usize },
}

/// Result of a lockless reader-side probe ([`Table::get_lockless`]).
pub struct ReadHit<V> {
    pub value: Arc<V>,
    pub idx: usize,
    pub gen: u32,
}

/// Open-addressed table of `2 * capacity` slots (load factor <= 0.5) plus
/// the intrusive LRU thread's head/tail and a live-entry counter.
pub struct Table<K, V, S = std::collections::hash_map::RandomState> {
    slots: Box<[Slot<K, V>]>,
    mask: usize,
    capacity: usize,
    head: std::cell::UnsafeCell<u32>,
    tail: std::cell::UnsafeCell<u32>,
    size: AtomicUsize,
    hasher: S,
}

// SAFETY: see `Slot`'s Sync impl — `head`/`tail` share the same
// writer-only discipline as `prev`/`next`.
unsafe impl<K: Send, V: Send + Sync, S: Send> Sync for Table<K, V, S> {}

impl<K, V> Table<K, V, std::collections::hash_map::RandomState>
where
    K: Copy + Eq + Hash,
    V: Send + Sync,
{
    /// `capacity` must be a power of two; the table allocates `2 * capacity`
    /// slots, guaranteeing a probe always finds an `Empty` slot within
    /// `capacity` steps (spec §4.D "Probing invariant").
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, std::collections::hash_map::RandomState::new())
    }
}

impl<K, V, S> Table<K, V, S>
where
    K: Copy + Eq + Hash,
    V: Send + Sync,
    S: BuildHasher,
{
    pub fn with_hasher(capacity: usize, hasher: S) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity > 0);
        let table_size = capacity * 2;
        let slots = (0..table_size)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: table_size - 1,
            capacity,
            head: std::cell::UnsafeCell::new(NULL),
            tail: std::cell::UnsafeCell::new(NULL),
            size: AtomicUsize::new(0),
            hasher,
        }
    }

    pub fn hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash as usize) & self.mask
    }

    fn next_idx(&self, idx: usize) -> usize {
        (idx + 1) & self.mask
    }

    // ---- writer-side probes (called under the shard lock) ----

    /// Walks the probe chain for `key`. `Empty` ends the probe as a miss
    /// (remembering the first tombstone seen, if any, as the insertion
    /// hint); `Deleted` is skipped; `Occupied` with matching key is a hit.
    pub fn lookup(&self, key: &K, hash: u64) -> Lookup {
        let mut idx = self.bucket(hash);
        let mut first_tombstone = None;
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Acquire) {
                EMPTY => return Lookup::Miss {
                    insert_hint: first_tombstone.unwrap_or(idx),
                },
                DELETED => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                OCCUPIED => {
                    if slot.key.load() == Some(*key) {
                        return Lookup::Hit {
                            idx,
                            gen: slot.gen.load(Ordering::Acquire),
                        };
                    }
                }
                _ => unreachable!("corrupted slot state"),
            }
            idx = self.next_idx(idx);
        }
        panic!("probe exceeded table size: load-factor invariant violated");
    }

    /// Pure probe (no mutation): the index `key` should be planted at —
    /// the first tombstone seen, else the first `Empty` slot.
    pub fn assign_slot(&self, key: &K, hash: u64) -> usize {
        let mut idx = self.bucket(hash);
        let mut first_tombstone = None;
        for _ in 0..self.slots.len() {
            match self.slots[idx].state.load(Ordering::Acquire) {
                EMPTY => return first_tombstone.unwrap_or(idx),
                DELETED => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                OCCUPIED => {
                    if self.slots[idx].key.load() == Some(*key) {
                        return idx;
                    }
                }
                _ => unreachable!("corrupted slot state"),
            }
            idx = self.next_idx(idx);
        }
        panic!("probe exceeded table size: load-factor invariant violated");
    }

    /// Publishes a new value into a slot whose prior state was `Empty` or
    /// `Deleted`. Odd->even gen protocol per spec §4.D.
    pub fn emplace_at(&self, idx: usize, key: K, value: Arc<V>) {
        let slot = &self.slots[idx];
        slot.gen.fetch_add(1, Ordering::AcqRel); // odd: mutation in flight
        slot.key.store(Some(key));
        slot.value.store(Some(value));
        slot.state.store(OCCUPIED, Ordering::Release);
        slot.gen.fetch_add(1, Ordering::Release); // even: published
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// In-place replacement at an `Occupied` slot. Returns the displaced
    /// value handle so the caller can retire it.
    pub fn update_slot(&self, idx: usize, new_value: Arc<V>) -> Option<Arc<V>> {
        let slot = &self.slots[idx];
        debug_assert_eq!(slot.state.load(Ordering::Acquire), OCCUPIED);
        slot.gen.fetch_add(1, Ordering::AcqRel); // odd
        let old = slot.value.swap(Some(new_value));
        slot.gen.fetch_add(1, Ordering::Release); // even
        old
    }

    /// Detaches `idx` from the LRU thread, tombstones it, and returns the
    /// displaced value handle for retirement.
    pub fn erase_index(&self, idx: usize) -> Option<Arc<V>> {
        self.detach(idx);
        let slot = &self.slots[idx];
        slot.gen.fetch_add(1, Ordering::AcqRel); // odd
        let old = slot.value.swap(None);
        slot.key.store(None);
        slot.state.store(DELETED, Ordering::Release);
        slot.gen.fetch_add(1, Ordering::Release); // even
        self.size.fetch_sub(1, Ordering::Relaxed);
        old
    }

    pub fn is_valid_gen(&self, idx: usize, g: u32) -> bool {
        let slot = &self.slots[idx];
        slot.state.load(Ordering::Acquire) == OCCUPIED && slot.gen.load(Ordering::Acquire) == g
    }

    // ---- intrusive LRU thread (writer-only) ----

    pub fn get_head(&self) -> u32 {
        unsafe { *self.head.get() }
    }

    pub fn get_tail(&self) -> u32 {
        unsafe { *self.tail.get() }
    }

    fn prev_of(&self, idx: usize) -> u32 {
        unsafe { *self.slots[idx].prev.get() }
    }

    fn next_of(&self, idx: usize) -> u32 {
        unsafe { *self.slots[idx].next.get() }
    }

    fn set_prev(&self, idx: usize, v: u32) {
        unsafe {
            *self.slots[idx].prev.get() = v;
        }
    }

    fn set_next(&self, idx: usize, v: u32) {
        unsafe {
            *self.slots[idx].next.get() = v;
        }
    }

    fn detach(&self, idx: usize) {
        let p = self.prev_of(idx);
        let n = self.next_of(idx);
        if p == NULL {
            unsafe {
                *self.head.get() = n;
            }
        } else {
            self.set_next(p as usize, n);
        }
        if n == NULL {
            unsafe {
                *self.tail.get() = p;
            }
        } else {
            self.set_prev(n as usize, p);
        }
        self.set_prev(idx, NULL);
        self.set_next(idx, NULL);
    }

    /// `true` if `idx` currently sits somewhere in the head/tail chain.
    /// A slot just handed back by `assign_slot` (never linked, or unlinked
    /// by a prior `erase_index`) has `prev == next == NULL` and is neither
    /// head nor tail, so `detach` must not be called on it — `detach`
    /// assumes its argument is already a list member and will otherwise
    /// read the fresh slot's NULL links as "this is the only node" and
    /// clobber the real head/tail.
    fn is_linked(&self, idx: usize) -> bool {
        self.get_head() == idx as u32
            || self.get_tail() == idx as u32
            || self.prev_of(idx) != NULL
            || self.next_of(idx) != NULL
    }

    /// Detaches `idx` from wherever it sits in the list (if it is linked at
    /// all) and re-links it as the new head. Idempotent when `idx` is
    /// already the head.
    pub fn move_to_front(&self, idx: usize) {
        let head = self.get_head();
        if head == idx as u32 {
            return;
        }
        if self.is_linked(idx) {
            self.detach(idx);
        }
        let old_head = self.get_head();
        self.set_next(idx, old_head);
        self.set_prev(idx, NULL);
        if old_head == NULL {
            unsafe {
                *self.tail.get() = idx as u32;
            }
        } else {
            self.set_prev(old_head as usize, idx as u32);
        }
        unsafe {
            *self.head.get() = idx as u32;
        }
    }

    // ---- reader-side lockless probe ----

    /// Brief spin budget while waiting out an in-flight writer before
    /// giving up (spec §4.D step 1: "if odd, optionally wait briefly then
    /// reload; if still odd, abort").
    const ODD_GEN_SPINS: u32 = 16;

    /// Reader-side probe: never blocks indefinitely, never takes a lock.
    /// Returns `None` on miss, on a still-in-flight write, or on a torn
    /// read (the gen changed between copying the value handle and the
    /// re-check) — all three collapse to "no observable value right now",
    /// matching spec §3 invariant 4/§8 property 5.
    pub fn get_lockless(&self, key: &K, hash: u64) -> Option<ReadHit<V>> {
        let mut idx = self.bucket(hash);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let mut g = slot.gen.load(Ordering::Acquire);
            if g & 1 == 1 {
                let mut settled = false;
                for _ in 0..Self::ODD_GEN_SPINS {
                    std::hint::spin_loop();
                    g = slot.gen.load(Ordering::Acquire);
                    if g & 1 == 0 {
                        settled = true;
                        break;
                    }
                }
                if !settled {
                    return None;
                }
            }

            match slot.state.load(Ordering::Acquire) {
                EMPTY => return None,
                DELETED => {
                    idx = self.next_idx(idx);
                    continue;
                }
                OCCUPIED => {
                    if slot.key.load() != Some(*key) {
                        idx = self.next_idx(idx);
                        continue;
                    }
                    let value = slot.value.load_full();
                    let g2 = slot.gen.load(Ordering::Acquire);
                    if g2 != g {
                        return None;
                    }
                    return value.map(|value| ReadHit { value, idx, gen: g });
                }
                _ => return None,
            }
        }
        None
    }
}
