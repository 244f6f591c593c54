//! Arena lock selection.
//!
//! The arena is generic over a `lock_api::RawMutex`. With the `threads`
//! feature (default) it uses parking_lot's raw mutex. [`NoLock`] is the
//! single-threaded variant: it only tracks whether the guard is held, which
//! catches re-entrant use from an OOM handler, and it is `!Sync`, so an arena
//! using it cannot be shared across threads at all.

#![allow(unsafe_code)]

use core::cell::Cell;

use parking_lot::lock_api::{GuardNoSend, RawMutex};

/// Lock used by `Arena` when none is named.
#[cfg(feature = "threads")]
pub type DefaultLock = parking_lot::RawMutex;
/// Lock used by `Arena` when none is named.
#[cfg(not(feature = "threads"))]
pub type DefaultLock = NoLock;

/// Non-synchronizing lock for single-threaded arenas.
#[derive(Debug)]
pub struct NoLock {
    held: Cell<bool>,
}

// SAFETY: `NoLock` is `!Sync`, so every lock/unlock happens on the owning
// thread. Exclusion within that thread is enforced by the `held` flag.
unsafe impl RawMutex for NoLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        held: Cell::new(false),
    };

    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        assert!(
            !self.held.replace(true),
            "nodealloc: single-threaded arena re-entered while locked"
        );
    }

    fn try_lock(&self) -> bool {
        !self.held.replace(true)
    }

    unsafe fn unlock(&self) {
        self.held.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_cycle() {
        let lock = NoLock::INIT;
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn reentrant_lock_panics() {
        let lock = NoLock::INIT;
        lock.lock();
        lock.lock();
    }

    #[test]
    fn guards_a_value() {
        let mutex = parking_lot::lock_api::Mutex::<NoLock, u32>::new(1);
        *mutex.lock() += 1;
        assert_eq!(*mutex.lock(), 2);
    }
}
