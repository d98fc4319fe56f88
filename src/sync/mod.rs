//! Synchronization primitives: mutex, reader/writer lock, monitor
//! (mutex+condvar), and a managed thread wrapper. Built on `parking_lot`
//! rather than raw `pthread_*` calls — `parking_lot`'s lock types expose
//! the same timed-lock operations the original hand-rolls atop
//! `pthread_{mutex,rwlock}_timedlock`/`timeout_to_abs`
//! (`original_source/os/src/unix/{mutex,rwlock,monitor}.c`), without the
//! `unsafe` FFI surface.

pub mod monitor;
pub mod mutex;
pub mod rwlock;
pub mod thread;

pub use monitor::Monitor;
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use thread::{ManagedThread, ThreadState};
