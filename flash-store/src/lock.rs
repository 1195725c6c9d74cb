//! Injected serialization primitive. Every public [`crate::Engine`] operation acquires this
//! lock for its duration; see the default implementations below for the two supported modes.

use core::cell::Cell;

/// The injected lock primitive failed to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockError;

/// A capability that serializes access to the engine. `Guard` releases the lock on drop.
pub trait DeviceLock {
    type Guard<'a>: 'a
    where
        Self: 'a;

    fn lock(&self) -> Result<Self::Guard<'_>, LockError>;
}

/// `RefCell`-style single-threaded lock. There is exactly one thread of control in the
/// reference deployment, so a reentrant lock attempt is a programmer error, not a condition
/// to recover from.
pub struct SingleThreadLock {
    locked: Cell<bool>,
}

impl SingleThreadLock {
    pub fn new() -> Self {
        SingleThreadLock {
            locked: Cell::new(false),
        }
    }
}

impl Default for SingleThreadLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLock for SingleThreadLock {
    type Guard<'a> = SingleThreadGuard<'a>;

    fn lock(&self) -> Result<Self::Guard<'_>, LockError> {
        if self.locked.replace(true) {
            panic!("reentrant lock on SingleThreadLock");
        }
        Ok(SingleThreadGuard { lock: self })
    }
}

pub struct SingleThreadGuard<'a> {
    lock: &'a SingleThreadLock,
}

impl Drop for SingleThreadGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.set(false);
    }
}

/// `std::sync::Mutex`-backed lock for host-side tests that genuinely exercise concurrent
/// callers, rather than just asserting against reentrancy.
#[cfg(feature = "std")]
pub struct StdMutexLock(std::sync::Mutex<()>);

#[cfg(feature = "std")]
impl StdMutexLock {
    pub fn new() -> Self {
        StdMutexLock(std::sync::Mutex::new(()))
    }
}

#[cfg(feature = "std")]
impl Default for StdMutexLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl DeviceLock for StdMutexLock {
    type Guard<'a> = std::sync::MutexGuard<'a, ()>;

    fn lock(&self) -> Result<Self::Guard<'_>, LockError> {
        self.0.lock().map_err(|_| LockError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn single_thread_lock_releases_on_drop() {
        let lock = SingleThreadLock::new();
        {
            let _guard = lock.lock().unwrap();
        }
        assert!(lock.lock().is_ok());
    }

    #[test]
    #[should_panic(expected = "reentrant lock")]
    fn single_thread_lock_panics_on_reentry() {
        let lock = SingleThreadLock::new();
        let _outer = lock.lock().unwrap();
        let _inner = lock.lock().unwrap();
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_mutex_lock_blocks_across_threads() {
        use std::sync::Arc;
        let lock = Arc::new(StdMutexLock::new());
        let first = lock.lock().unwrap();
        let lock2 = lock.clone();
        let handle = std::thread::spawn(move || {
            let _guard = lock2.lock().unwrap();
        });
        drop(first);
        handle.join().unwrap();
    }
}
