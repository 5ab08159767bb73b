//! Stable per-thread reader ids for the SPSC trace rings (spec §6).
//!
//! The recommended policy is a process-local counter assigned lazily on
//! first use, wrapped modulo `max_threads`. Collisions are tolerated by the
//! shard engine — they degrade a ring from true-SPSC to effectively-MPSC,
//! which only costs recency fidelity, never correctness (see DESIGN.md).

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

/// Returns a stable id for the calling thread in `[0, max_threads)`.
///
/// The same thread always gets the same id for the lifetime of the
/// process; distinct threads get distinct ids until the global counter
/// wraps past `max_threads`, at which point ids start repeating (spec §6).
pub fn current(max_threads: usize) -> usize {
    debug_assert!(max_threads > 0);
    THREAD_ID.with(|slot| {
        if let Some(id) = slot.get() {
            return id % max_threads;
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        slot.set(Some(id));
        id % max_threads
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn stable_within_one_thread() {
        let a = current(32);
        let b = current(32);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_across_threads_until_wrap() {
        let ids: Vec<usize> = (0..8)
            .map(|_| thread::spawn(|| current(32)).join().unwrap())
            .collect();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
