//! Polymorphic stream contract: read/write/timeout/destroy over pipes,
//! files, sockets, and in-memory transforms.

use crate::error::Result;
use std::time::Duration;

/// Type tag carried by every stream, used by the splice engine to pick a
/// fast path and by the peer/local-address queries (which only make sense
/// on sockets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Pipe,
    File,
    Socket { udp: bool },
    Transform,
    User,
}

/// A timeout of `0` means "wait forever"; `set_timeout` is a ceiling applied
/// to each *subsequent* call, not cumulative across calls.
pub fn ms_to_duration(ms: u32) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(u64::from(ms)))
    }
}

/// Uniform contract over every concrete stream realization (pipe, file,
/// socket, transform, or a caller-supplied `User` stream).
///
/// Individual streams are **not** internally synchronized by default —
/// callers sharing a stream across threads must serialize access
/// themselves (spec §5). Only the thread pool, server objects, and the
/// dedicated synchronization primitives provide internal locking.
pub trait Stream: Send {
    /// Tag identifying the concrete realization; used by [`crate::splice`]
    /// to choose a fast path and by address queries on sockets.
    fn stream_type(&self) -> StreamType;

    /// `0` disables the timeout (infinite wait); otherwise a ceiling
    /// applied to each subsequent `read`/`write` call.
    fn set_timeout(&mut self, ms: u32);

    /// Reads up to `buf.len()` bytes.
    ///
    /// - May block up to the configured timeout; on expiry returns
    ///   [`crate::error::ErrorCode::Timeout`] with `0` bytes read.
    /// - Returns [`crate::error::ErrorCode::Closed`] if the peer
    ///   half-closed or the handle is dead.
    /// - Returns [`crate::error::ErrorCode::Eof`] once the source is
    ///   exhausted; a subsequent read also returns `Eof`.
    /// - A successful read may return fewer than `buf.len()` bytes; `Ok(0)`
    ///   must never occur.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes up to `buf.len()` bytes.
    ///
    /// May short-write; on short-write the result is `Ok` and the caller
    /// must loop. On a packet-oriented socket,
    /// [`crate::error::ErrorCode::TooLarge`] means the message does not
    /// fit in a single datagram.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flushes any pending writes and releases OS resources. The stream
    /// must not be touched after this call.
    ///
    /// Streams also flush on `Drop`, as insurance against a caller
    /// forgetting to call `destroy`; calling it explicitly lets a caller
    /// observe and propagate the flush error, which `Drop` cannot.
    fn destroy(&mut self) -> Result<()>;

    /// Raw descriptor usable for a zero-copy splice fast path, if this
    /// stream is backed by one (spec §4.O names pipes, files and sockets;
    /// in-memory transforms never are). Default `None` opts a stream out of
    /// the fast path, falling back to a buffered copy.
    fn raw_fd_for_splice(&self, _writable: bool) -> Option<std::os::unix::io::RawFd> {
        None
    }

    /// Whether this stream is a file opened in Append mode. The splice
    /// fast path needs this to seek a file output to end-of-file around
    /// `sendfile`, since Append there is purely the seek-end/write/seek-back
    /// dance `FileStream::write` performs, not an `O_APPEND` fd flag.
    /// Default `false` for every stream that isn't an append-mode file.
    fn is_append_file(&self) -> bool {
        false
    }

    /// Writes the entirety of `buf`, looping on short writes. A short
    /// write that leaves bytes unsent after the underlying `write` returns
    /// `Ok(0)` is reported as `Internal` (the case spec §4.J calls out for
    /// `printf`).
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(crate::error::ErrorCode::Internal);
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// Extra operations available on sockets: their peer/local address.
pub trait SocketQuery {
    fn peer_address(&self) -> Result<crate::addr::NetAddr>;
    fn local_address(&self) -> Result<crate::addr::NetAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ms_is_infinite() {
        assert_eq!(ms_to_duration(0), None);
    }

    #[test]
    fn nonzero_ms_converts() {
        assert_eq!(ms_to_duration(250), Some(Duration::from_millis(250)));
    }
}
