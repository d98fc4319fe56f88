//! A fixed-size worker pool with a FIFO task queue, matching
//! `tl_threadpool_*` in `original_source/os/src/unix/threadpool.c`: a
//! shared queue guarded by one mutex, a `new_task` condition workers wait
//! on, and a `queue_empty` condition `wait(timeout)` drains against.
//! `std::sync::{Mutex, Condvar}` plus the teacher's `unwrap_poison` idiom
//! (`examples/AlexanderSchuetz97-rust-tls-duplex-stream/src/lib.rs`)
//! stand in for the original's raw `pthread_mutex_t`/`pthread_cond_t`.

use crate::allocator::CloneHook;
use crate::error::{ErrorCode, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A poisoned lock still holds a perfectly usable `VecDeque` — a panicking
/// worker mid-task doesn't corrupt the queue itself, so recovering it is
/// safe, unlike the original's unconditional `pthread_mutex_lock`.
fn unwrap_poison<T>(r: std::sync::LockResult<T>) -> T {
    r.unwrap_or_else(|e| e.into_inner())
}

type Task = Box<dyn FnOnce() + Send>;
type Callback = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    new_task: Condvar,
    queue_empty: Condvar,
    shutdown: AtomicBool,
    total_submitted: AtomicU64,
    total_completed: AtomicU64,
}

/// A fixed-size pool of worker threads draining one shared FIFO queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `num_workers` threads, each running `init` once before
    /// pulling tasks and `cleanup` once after the pool shuts down.
    /// `num_workers == 0` is rejected.
    pub fn new(num_workers: u32, init: Option<Callback>, cleanup: Option<Callback>) -> Result<Self> {
        if num_workers == 0 {
            return Err(ErrorCode::BadArg);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            new_task: Condvar::new(),
            queue_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
            total_submitted: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
        });

        let workers = (0..num_workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let init = init.clone();
                let cleanup = cleanup.clone();
                std::thread::spawn(move || worker_loop(shared, init, cleanup))
            })
            .collect();

        Ok(ThreadPool { shared, workers })
    }

    /// Queues an owned task for some worker to run.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_task(Box::new(f));
    }

    /// Queues a task built from a *borrowed* value: `hook` deep-copies
    /// `value` into a value the task owns before it is queued, matching
    /// `tl_threadpool_add_task`'s `alloc->copy_inplace` path for a
    /// caller-owned buffer that outlives the call.
    pub fn submit_borrowed<T, F>(&self, value: &T, hook: &dyn CloneHook<T>, f: F)
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let owned = hook.clone_value(value);
        self.push_task(Box::new(move || f(owned)));
    }

    fn push_task(&self, task: Task) {
        let mut guard = unwrap_poison(self.shared.queue.lock());
        guard.push_back(task);
        self.shared.total_submitted.fetch_add(1, Ordering::SeqCst);
        self.shared.new_task.notify_one();
    }

    /// Blocks up to `timeout_ms` (`0` = forever) until the queue drains to
    /// empty, matching the original's `queue_empty` broadcast every time a
    /// worker finds nothing to do.
    pub fn wait(&self, timeout_ms: u32) -> Result<()> {
        let mut guard = unwrap_poison(self.shared.queue.lock());
        if timeout_ms == 0 {
            while !guard.is_empty() {
                guard = unwrap_poison(self.shared.queue_empty.wait(guard));
            }
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        while !guard.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorCode::Timeout);
            }
            let (next, timeout) =
                unwrap_poison(self.shared.queue_empty.wait_timeout(guard, deadline - now));
            guard = next;
            if timeout.timed_out() && !guard.is_empty() {
                return Err(ErrorCode::Timeout);
            }
        }
        Ok(())
    }

    pub fn total_submitted(&self) -> u64 {
        self.shared.total_submitted.load(Ordering::SeqCst)
    }

    pub fn total_completed(&self) -> u64 {
        self.shared.total_completed.load(Ordering::SeqCst)
    }
}

fn worker_loop(shared: Arc<Shared>, init: Option<Callback>, cleanup: Option<Callback>) {
    if let Some(init) = &init {
        init();
    }

    loop {
        let task = {
            let mut guard: MutexGuard<'_, VecDeque<Task>> = unwrap_poison(shared.queue.lock());
            loop {
                if let Some(task) = guard.pop_front() {
                    break Some(task);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                shared.queue_empty.notify_all();
                guard = unwrap_poison(shared.new_task.wait(guard));
            }
        };

        match task {
            Some(task) => {
                task();
                shared.total_completed.fetch_add(1, Ordering::SeqCst);
                let guard = unwrap_poison(shared.queue.lock());
                if guard.is_empty() {
                    shared.queue_empty.notify_all();
                }
            }
            None => break,
        }
    }

    if let Some(cleanup) = &cleanup {
        cleanup();
    }
    tracing::debug!("worker thread exiting");
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _guard = unwrap_poison(self.shared.queue.lock());
            self.shared.new_task.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::DefaultClone;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = ThreadPool::new(4, None, None).unwrap();
        let counter = Arc::new(AtomicI64::new(0));
        for _ in 0..200 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait(2000).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
        assert_eq!(pool.total_submitted(), 200);
        assert_eq!(pool.total_completed(), 200);
    }

    #[test]
    fn submit_borrowed_clones_before_queueing() {
        let pool = ThreadPool::new(2, None, None).unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));
        let source = String::from("payload");
        for _ in 0..10 {
            let r = Arc::clone(&results);
            pool.submit_borrowed(&source, &DefaultClone, move |owned: String| {
                r.lock().unwrap().push(owned);
            });
        }
        drop(source);
        pool.wait(2000).unwrap();
        assert_eq!(results.lock().unwrap().len(), 10);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert_eq!(ThreadPool::new(0, None, None).unwrap_err(), ErrorCode::BadArg);
    }

    #[test]
    fn init_and_cleanup_run_once_per_worker() {
        let init_count = Arc::new(AtomicI64::new(0));
        let cleanup_count = Arc::new(AtomicI64::new(0));
        let ic = Arc::clone(&init_count);
        let cc = Arc::clone(&cleanup_count);
        {
            let pool = ThreadPool::new(
                3,
                Some(Arc::new(move || {
                    ic.fetch_add(1, Ordering::SeqCst);
                })),
                Some(Arc::new(move || {
                    cc.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
            pool.submit(|| ());
            pool.wait(2000).unwrap();
        }
        assert_eq!(init_count.load(Ordering::SeqCst), 3);
        assert_eq!(cleanup_count.load(Ordering::SeqCst), 3);
    }
}
