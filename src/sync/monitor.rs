//! A mutex paired with a condition variable, matching
//! `tl_monitor_{lock,wait,notify,notify_all}` in
//! `original_source/os/src/unix/monitor.c`.

use crate::error::{ErrorCode, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub struct Monitor<T> {
    mutex: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(data: T) -> Self {
        Monitor {
            mutex: Mutex::new(data),
            cond: Condvar::new(),
        }
    }

    /// Acquires the monitor's mutex, blocking up to `timeout_ms`
    /// (`0` = forever).
    pub fn lock(&self, timeout_ms: u32) -> Result<MonitorGuard<'_, T>> {
        let guard = if timeout_ms == 0 {
            self.mutex.lock()
        } else {
            self.mutex
                .try_lock_for(Duration::from_millis(u64::from(timeout_ms)))
                .ok_or(ErrorCode::Timeout)?
        };
        Ok(MonitorGuard {
            guard,
            cond: &self.cond,
        })
    }
}

/// A held monitor lock; `wait`/`notify`/`notify_all` are only meaningful
/// while holding one, mirroring the original's `tl_monitor_wait` requiring
/// the caller to already hold `this->mutex`.
pub struct MonitorGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    cond: &'a Condvar,
}

impl<'a, T> MonitorGuard<'a, T> {
    /// Releases the mutex and blocks on the condition variable up to
    /// `timeout_ms` (`0` = forever), re-acquiring the mutex before
    /// returning — same contract as `pthread_cond_wait`/`_timedwait`.
    pub fn wait(&mut self, timeout_ms: u32) -> Result<()> {
        if timeout_ms == 0 {
            self.cond.wait(&mut self.guard);
            return Ok(());
        }
        let result = self
            .cond
            .wait_for(&mut self.guard, Duration::from_millis(u64::from(timeout_ms)));
        if result.timed_out() {
            return Err(ErrorCode::Timeout);
        }
        Ok(())
    }

    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}

impl<'a, T> std::ops::Deref for MonitorGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> std::ops::DerefMut for MonitorGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
