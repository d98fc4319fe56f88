//! Stream over OS byte-pipe descriptors.
//!
//! Wraps one or two raw file descriptors: a read fd and a write fd, which
//! may be the same descriptor (a full-duplex pipe-like device) or distinct
//! ones (the two ends of a process's stdio pipes, spec §4.N). Each
//! operation polls its descriptor for readiness under the current timeout
//! before calling `read`/`write`, exactly as `wait_for_fd` does in
//! `original_source/os/src/unix/os.c`.

use crate::error::{ErrorCode, Result};
use crate::fd_util::{retry_on_eintr, wait_for_fd};
use crate::stream::{ms_to_duration, Stream, StreamType};
use std::os::unix::io::RawFd;

/// A stream backed by one or two raw unix pipe descriptors.
#[derive(Debug)]
pub struct PipeStream {
    read_fd: Option<RawFd>,
    write_fd: Option<RawFd>,
    timeout_ms: u32,
    destroyed: bool,
}

impl PipeStream {
    /// Takes ownership of `read_fd`/`write_fd`. Either may be `None` for a
    /// half-duplex pipe (e.g. a child's stdout-only redirection).
    ///
    /// # Safety
    /// The caller must guarantee both descriptors are valid, open, and not
    /// owned elsewhere — `PipeStream` closes them on `destroy`/`Drop`.
    pub unsafe fn from_raw_fds(read_fd: Option<RawFd>, write_fd: Option<RawFd>) -> Self {
        PipeStream {
            read_fd,
            write_fd,
            timeout_ms: 0,
            destroyed: false,
        }
    }
}

impl Stream for PipeStream {
    fn stream_type(&self) -> StreamType {
        StreamType::Pipe
    }

    fn set_timeout(&mut self, ms: u32) {
        self.timeout_ms = ms;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fd = self.read_fd.ok_or(ErrorCode::NotSupported)?;
        if buf.is_empty() {
            return Ok(0);
        }
        wait_for_fd(fd, ms_to_duration(self.timeout_ms), false)?;

        let n = retry_on_eintr(|| unsafe {
            libc::read(fd, buf.as_mut_ptr().cast(), buf.len())
        });

        if n < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        if n == 0 {
            return Err(ErrorCode::Closed);
        }
        Ok(n as usize)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let fd = self.write_fd.ok_or(ErrorCode::NotSupported)?;
        if buf.is_empty() {
            return Ok(0);
        }
        wait_for_fd(fd, ms_to_duration(self.timeout_ms), true)?;

        let n = retry_on_eintr(|| unsafe {
            libc::write(fd, buf.as_ptr().cast(), buf.len())
        });

        if n < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        Ok(n as usize)
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let read_fd = self.read_fd.take();
        let write_fd = self.write_fd.take();
        unsafe {
            if let Some(fd) = read_fd {
                libc::close(fd);
            }
            // A full-duplex pipe uses the same fd for both ends; don't
            // close it twice.
            if let Some(fd) = write_fd {
                if read_fd != Some(fd) {
                    libc::close(fd);
                }
            }
        }
        Ok(())
    }

    fn raw_fd_for_splice(&self, writable: bool) -> Option<RawFd> {
        if writable {
            self.write_fd
        } else {
            self.read_fd
        }
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}
