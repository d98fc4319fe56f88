//! A mutex with an optional recursive mode and a millisecond timeout on
//! acquisition, matching `tl_mutex_create(recursive)` /
//! `tl_mutex_lock(timeout)` in
//! `original_source/os/src/unix/mutex.c`.

use crate::error::{ErrorCode, Result};
use parking_lot::{Condvar, Mutex as RawMutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

struct State<T> {
    data: T,
    owner: Option<ThreadId>,
    depth: u32,
}

/// A mutex guarding `T`. When created recursive, the owning thread may
/// lock it again without deadlocking; each extra lock needs a matching
/// unlock (dropping a [`MutexGuard`]) before the data is released to
/// another thread.
pub struct Mutex<T> {
    recursive: bool,
    state: RawMutex<State<T>>,
    released: Condvar,
}

impl<T> Mutex<T> {
    pub fn new(data: T, recursive: bool) -> Self {
        Mutex {
            recursive,
            state: RawMutex::new(State {
                data,
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking up to `timeout_ms` (`0` = forever).
    pub fn lock(&self, timeout_ms: u32) -> Result<MutexGuard<'_, T>> {
        let deadline = if timeout_ms == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
        };
        let me = std::thread::current().id();

        let mut guard = self.state.lock();
        loop {
            let free = guard.owner.is_none();
            let reentrant = self.recursive && guard.owner == Some(me);
            if free || reentrant {
                guard.owner = Some(me);
                guard.depth += 1;
                return Ok(MutexGuard {
                    mutex: self,
                    _marker: std::marker::PhantomData,
                });
            }

            match deadline {
                None => {
                    self.released.wait(&mut guard);
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(ErrorCode::Timeout);
                    }
                    let timed_out = self.released.wait_for(&mut guard, d - now).timed_out();
                    if timed_out {
                        return Err(ErrorCode::Timeout);
                    }
                }
            }
        }
    }
}

/// RAII guard returned by [`Mutex::lock`]; unlocks (and, for a recursive
/// mutex, decrements the hold count) on drop.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _marker: std::marker::PhantomData<*const ()>,
}

// SAFETY: the guard only ever accesses its mutex's internal lock, which is
// itself `Send`/`Sync`; the `PhantomData<*const ()>` above exists only to
// keep the guard `!Send` the way a lock guard should be, not to opt out of
// soundness.
unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> std::ops::Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard is proof this thread holds the lock.
        unsafe { &(*self.mutex.state.data_ptr()).data }
    }
}

impl<T> std::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut (*self.mutex.state.data_ptr()).data }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        let mut guard = self.mutex.state.lock();
        guard.depth -= 1;
        if guard.depth == 0 {
            guard.owner = None;
            self.mutex.released.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn exclusive_access_across_threads() {
        let mutex = Arc::new(Mutex::new(0i64, false));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&mutex);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = m.lock(0).unwrap();
                    *guard += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*mutex.lock(0).unwrap(), 8000);
    }

    #[test]
    fn recursive_lock_from_same_thread_does_not_deadlock() {
        let mutex = Mutex::new(5, true);
        let outer = mutex.lock(0).unwrap();
        let inner = mutex.lock(100).unwrap();
        assert_eq!(*inner, 5);
        drop(inner);
        drop(outer);
    }

    #[test]
    fn timeout_elapses_when_contended() {
        let mutex = Arc::new(Mutex::new((), false));
        let held = mutex.lock(0).unwrap();
        let m2 = Arc::clone(&mutex);
        let handle = std::thread::spawn(move || m2.lock(50));
        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), ErrorCode::Timeout);
        drop(held);
    }
}
