//! A managed thread with an observable state and a timeout-bounded join,
//! matching `tl_thread_{create,join,get_state,get_return_value}` in
//! `original_source/os/src/unix/thread.c`. The state transitions
//! (`Pending` → `Running` → `Terminated`) are tracked through a
//! [`Monitor`](crate::sync::Monitor) exactly as the original does with its
//! own embedded monitor, notifying joiners on termination.

use crate::error::{ErrorCode, Result};
use crate::sync::monitor::Monitor;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Pending,
    Running,
    Terminated,
}

struct Shared<R> {
    state: ThreadState,
    retval: Option<R>,
}

/// A spawned thread plus the bookkeeping needed for `join(timeout)` and
/// `get_state()`. `R` is the worker closure's return value.
pub struct ManagedThread<R> {
    monitor: Arc<Monitor<Shared<R>>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: Send + 'static> ManagedThread<R> {
    /// Spawns `f` on a new OS thread. The thread's observable state starts
    /// at `Pending`, flips to `Running` as its first action, and to
    /// `Terminated` (notifying any waiters) once `f` returns.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let monitor = Arc::new(Monitor::new(Shared {
            state: ThreadState::Pending,
            retval: None,
        }));
        let monitor_for_thread = Arc::clone(&monitor);

        let handle = std::thread::spawn(move || {
            {
                let mut guard = monitor_for_thread.lock(0).unwrap();
                guard.state = ThreadState::Running;
            }

            let retval = f();

            let mut guard = monitor_for_thread.lock(0).unwrap();
            guard.retval = Some(retval);
            guard.state = ThreadState::Terminated;
            guard.notify_all();
        });

        ManagedThread {
            monitor,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> ThreadState {
        self.monitor.lock(0).unwrap().state
    }

    /// Blocks up to `timeout_ms` (`0` = forever) for the thread to reach
    /// `Terminated`, then joins the underlying OS thread and returns its
    /// result. Returns `Timeout` if the deadline passes first, leaving the
    /// thread still running and joinable later.
    pub fn join(&mut self, timeout_ms: u32) -> Result<R> {
        {
            let mut guard = self.monitor.lock(0).unwrap();
            while guard.state != ThreadState::Terminated {
                if timeout_ms == 0 {
                    guard.wait(0)?;
                } else {
                    guard.wait(timeout_ms)?;
                    if guard.state != ThreadState::Terminated {
                        return Err(ErrorCode::Timeout);
                    }
                }
            }
        }

        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| ErrorCode::Internal)?;
        }

        let mut guard = self.monitor.lock(0).unwrap();
        guard.retval.take().ok_or(ErrorCode::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_returns_the_closures_value() {
        let mut t = ManagedThread::spawn(|| 21 * 2);
        assert_eq!(t.join(2000).unwrap(), 42);
    }

    #[test]
    fn state_reaches_terminated_after_join() {
        let mut t = ManagedThread::spawn(|| ());
        t.join(2000).unwrap();
    }

    #[test]
    fn join_times_out_on_a_slow_thread() {
        let mut t = ManagedThread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(200));
            1
        });
        assert_eq!(t.join(10).unwrap_err(), ErrorCode::Timeout);
        assert_eq!(t.join(2000).unwrap(), 1);
    }
}
