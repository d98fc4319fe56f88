//! A reader/writer lock with a millisecond timeout on acquisition,
//! matching `tl_rwlock_lock_read`/`tl_rwlock_lock_write` in
//! `original_source/os/src/unix/rwlock.c`. `parking_lot::RwLock` already
//! exposes timed try-lock operations, so this is a thin wrapper rather
//! than a hand-rolled condvar loop.

use crate::error::{ErrorCode, Result};
use parking_lot::{RwLock as RawRwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

pub struct RwLock<T> {
    inner: RawRwLock<T>,
}

impl<T> RwLock<T> {
    pub fn new(data: T) -> Self {
        RwLock {
            inner: RawRwLock::new(data),
        }
    }

    /// Acquires a shared (read) lock, blocking up to `timeout_ms`
    /// (`0` = forever).
    pub fn lock_read(&self, timeout_ms: u32) -> Result<RwLockReadGuard<'_, T>> {
        if timeout_ms == 0 {
            return Ok(self.inner.read());
        }
        self.inner
            .try_read_for(Duration::from_millis(u64::from(timeout_ms)))
            .ok_or(ErrorCode::Timeout)
    }

    /// Acquires an exclusive (write) lock, blocking up to `timeout_ms`
    /// (`0` = forever).
    pub fn lock_write(&self, timeout_ms: u32) -> Result<RwLockWriteGuard<'_, T>> {
        if timeout_ms == 0 {
            return Ok(self.inner.write());
        }
        self.inner
            .try_write_for(Duration::from_millis(u64::from(timeout_ms)))
            .ok_or(ErrorCode::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn readers_do_not_exclude_each_other() {
        let lock = RwLock::new(42);
        let a = lock.lock_read(0).unwrap();
        let b = lock.lock_read(0).unwrap();
        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
    }

    #[test]
    fn writer_excludes_readers_with_timeout() {
        let lock = Arc::new(RwLock::new(0));
        let _write_guard = lock.lock_write(0).unwrap();
        let l2 = Arc::clone(&lock);
        let handle = std::thread::spawn(move || l2.lock_read(50));
        assert_eq!(handle.join().unwrap().unwrap_err(), ErrorCode::Timeout);
    }

    #[test]
    fn mutual_exclusion_with_shared_counter() {
        let lock = Arc::new(RwLock::new(0i64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let l = Arc::clone(&lock);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    let mut guard = l.lock_write(0).unwrap();
                    *guard += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock_read(0).unwrap(), 4000);
    }
}
