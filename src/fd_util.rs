//! Shared unix fd-readiness polling and interrupted-syscall retry helpers.
//!
//! Mirrors `wait_for_fd` and the `EINTR` retry loops in
//! `original_source/os/src/unix/{os,file}.c`: `poll(2)` is the modern
//! equivalent of the original's `select(2)`, and retries on `EINTR` are
//! bounded at 3 before the failure is surfaced as
//! [`crate::error::ErrorCode::Internal`].

use crate::error::{ErrorCode, Result};
use std::os::unix::io::RawFd;
use std::time::Duration;

const MAX_EINTR_RETRIES: u32 = 3;

/// Polls `fd` for readability (`writable = false`) or writability
/// (`writable = true`) up to `timeout`. `None` waits forever. Returns
/// `Ok(())` once ready, `Err(Timeout)` on expiry.
pub fn wait_for_fd(fd: RawFd, timeout: Option<Duration>, writable: bool) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: if writable { libc::POLLOUT } else { libc::POLLIN },
        revents: 0,
    };

    let timeout_ms: i32 = match timeout {
        None => -1,
        Some(d) => d.as_millis().min(i64::MAX as u128) as i32,
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret == 0 {
        return Err(ErrorCode::Timeout);
    }
    if ret < 0 {
        return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
    }
    if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 && !writable {
        // Readable-with-error is how a peer close usually surfaces; let the
        // subsequent read() turn this into Eof/Closed with the right code.
    }
    Ok(())
}

/// Runs `op` (a raw read/write syscall wrapper returning the libc-style
/// `isize`, with `errno` set on failure), retrying up to 3 times on
/// `EINTR`, matching `file_read`/`file_write`'s `intr_count` loop.
pub fn retry_on_eintr<F: FnMut() -> isize>(mut op: F) -> isize {
    let mut attempts = 0;
    loop {
        let result = op();
        if result >= 0 {
            return result;
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) && attempts < MAX_EINTR_RETRIES {
            attempts += 1;
            continue;
        }
        return result;
    }
}
