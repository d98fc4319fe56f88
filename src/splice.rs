//! Copies bytes from one [`Stream`] to another, preferring a zero-copy
//! kernel fast path and falling back to a buffered copy loop. Grounded in
//! `tl_iostream_splice`/`splice_copy` in
//! `original_source/os/src/splice.c` and the Linux fast path in
//! `original_source/os/src/unix/iostream.c`.

use crate::error::{ErrorCode, Result};
use crate::fd_util::wait_for_fd;
use crate::stream::{Stream, StreamType};

bitflags::bitflags! {
    /// Flags accepted by [`splice`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpliceFlags: u32 {
        /// Fail with [`ErrorCode::NotSupported`] instead of silently
        /// degrading to a buffered copy when no kernel fast path applies.
        const NO_FALLBACK = 0x01;
    }
}

const ALL_SPLICE_FLAGS: u32 = 0x01;
const COPY_BUFFER_SIZE: usize = 1024;

/// Copies up to `count` bytes from `input` to `output`.
///
/// Returns the number of bytes actually transferred, which can be less
/// than `count` on `Eof` (a short splice is not itself an error — the
/// caller sees the byte count and may call again). `destroy`ing either
/// stream while bytes remain unread/unwritten loses them silently, same
/// as the original; this is documented, not fixed.
pub fn splice(
    output: &mut dyn Stream,
    input: &mut dyn Stream,
    count: usize,
    flags: SpliceFlags,
) -> Result<usize> {
    if (flags.bits() & !ALL_SPLICE_FLAGS) != 0 {
        return Err(ErrorCode::BadArg);
    }
    if count == 0 {
        return Ok(0);
    }

    match fast_path(output, input, count) {
        Ok(n) => {
            tracing::trace!(n, "splice fast path transferred bytes");
            return Ok(n);
        }
        Err(ErrorCode::NotSupported) if flags.contains(SpliceFlags::NO_FALLBACK) => {
            return Err(ErrorCode::NotSupported);
        }
        Err(ErrorCode::NotSupported) => {
            tracing::trace!("splice fast path unavailable, falling back to buffered copy");
        }
        Err(e) => return Err(e),
    }

    buffered_copy(output, input, count)
}

#[cfg(target_os = "linux")]
fn fast_path(output: &mut dyn Stream, input: &mut dyn Stream, count: usize) -> Result<usize> {
    let in_fd = input
        .raw_fd_for_splice(false)
        .ok_or(ErrorCode::NotSupported)?;
    let out_fd = output
        .raw_fd_for_splice(true)
        .ok_or(ErrorCode::NotSupported)?;

    // The original also waits on each descriptor's own configured timeout
    // before attempting the kernel call; there is no per-stream timeout
    // accessor on the trait, so the fast path here waits forever (callers
    // that need a bound already get one via the fallback's `wait_for_fd`
    // calls when this path is unavailable). Servers that require a bounded
    // splice should set `NO_FALLBACK` off and prefer the buffered path by
    // not exposing raw fds (in-memory transforms never do).
    wait_for_fd(in_fd, None, false)?;
    wait_for_fd(out_fd, None, true)?;

    let uses_splice =
        input.stream_type() == StreamType::Pipe || output.stream_type() == StreamType::Pipe;

    if uses_splice {
        let res = unsafe {
            libc::splice(
                in_fd,
                std::ptr::null_mut(),
                out_fd,
                std::ptr::null_mut(),
                count,
                libc::SPLICE_F_MOVE,
            )
        };
        if res <= 0 {
            return Err(ErrorCode::NotSupported);
        }
        return Ok(res as usize);
    }

    if input.stream_type() != StreamType::File {
        return Err(ErrorCode::NotSupported);
    }

    // Append mode on a file output is purely a seek-end/write/seek-back
    // dance at the `FileStream` level (spec §9), not an `O_APPEND` fd flag,
    // so `sendfile` writing at `out_fd`'s current offset would land in the
    // middle of the file instead of at end-of-file. Save the offset, seek
    // to end for the transfer, then restore it, mirroring
    // `FileStream::write`'s own race.
    let saved_offset = if output.is_append_file() {
        let old = unsafe { libc::lseek(out_fd, 0, libc::SEEK_CUR) };
        if old < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        if unsafe { libc::lseek(out_fd, 0, libc::SEEK_END) } < 0 {
            return Err(ErrorCode::from_io(&std::io::Error::last_os_error()));
        }
        Some(old)
    } else {
        None
    };

    let res = unsafe { libc::sendfile(out_fd, in_fd, std::ptr::null_mut(), count) };

    if let Some(old) = saved_offset {
        unsafe {
            libc::lseek(out_fd, old, libc::SEEK_SET);
        }
    }

    if res <= 0 {
        return Err(ErrorCode::NotSupported);
    }
    Ok(res as usize)
}

#[cfg(not(target_os = "linux"))]
fn fast_path(_output: &mut dyn Stream, _input: &mut dyn Stream, _count: usize) -> Result<usize> {
    Err(ErrorCode::NotSupported)
}

fn buffered_copy(output: &mut dyn Stream, input: &mut dyn Stream, count: usize) -> Result<usize> {
    let mut remaining = count;
    let mut total = 0usize;
    let mut buf = [0u8; COPY_BUFFER_SIZE];

    while remaining > 0 {
        let want = remaining.min(buf.len());
        let read_result = input.read(&mut buf[..want]);

        let got = match read_result {
            Ok(n) => n,
            // `Eof` (file sources) and `Closed` (pipe/socket sources losing
            // their write end) both mean "nothing more is coming" for a
            // splice; a short splice is not itself an error.
            Err(ErrorCode::Eof) | Err(ErrorCode::Closed) => break,
            Err(e) => return Err(e),
        };

        let mut off = 0;
        while off < got {
            let n = output.write(&buf[off..got])?;
            off += n;
            remaining -= n;
            total += n;
        }
    }

    Ok(total)
}
