//! Shard writer lock: a short spin lock with back-off to `yield_now`.
//!
//! Grounded in the teacher's `storage::lock::{try_lock, try_rlock}`
//! (`parking_lot::RwLock` spun a fixed number of times before giving up).
//! Generalized here from "spin then return `None`" into "spin then yield
//! and keep trying" because the spec requires infallible, eventually-
//! successful acquisition (§4.E: "Lock acquisition is infallible: spin
//! until acquired; yield after a bounded spin budget") rather than a
//! `try_` API a caller can give up on.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

/// Number of bare spins attempted before falling back to `yield_now`,
/// matching spec §5's "back-off to yield after e.g. 2048 pauses".
const SPIN_BUDGET: u32 = 2048;

/// A non-reentrant spin lock that never returns without the lock held.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning (then yielding) until it succeeds.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut spins = 0u32;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if spins < SPIN_BUDGET {
                hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Non-blocking attempt, used by sampling-style readers that can fall
    /// back to a different shard rather than wait.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> std::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> std::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
