//! Line-at-a-time reading and a `printf`-style formatted write helper.

use crate::error::{ErrorCode, Result};
use crate::stream::Stream;

bitflags::bitflags! {
    /// Flags accepted by [`read_line`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineFlags: u32 {
        /// Decode input as UTF-8 (pulling continuation bytes as needed)
        /// instead of treating each byte as Latin-1.
        const UTF8 = 0x01;
    }
}

/// Reads one byte at a time until LF (discarded) or end-of-stream,
/// accumulating into a `String`.
///
/// - A CR immediately preceding the LF is kept verbatim, not stripped.
/// - With [`LineFlags::UTF8`] set, a multi-byte lead byte pulls its
///   continuation bytes in the same call and the whole code point is
///   appended; a truncated/invalid sequence is reported as
///   [`ErrorCode::BadArg`].
/// - Without the flag, every byte is treated as Latin-1 and promoted to
///   its UTF-8 encoding on append, so any input is representable.
/// - End-of-stream with a non-empty accumulator returns the line as
///   `Ok`; end-of-stream with nothing accumulated yet propagates
///   `Eof`/`Closed` from the underlying read.
pub fn read_line(stream: &mut dyn Stream, flags: LineFlags) -> Result<String> {
    let mut line = String::new();
    let mut byte = [0u8; 1];

    loop {
        match stream.read(&mut byte) {
            Ok(0) => unreachable!("Stream::read must not return Ok(0)"),
            Ok(_) => {}
            Err(ErrorCode::Eof) | Err(ErrorCode::Closed) => {
                if line.is_empty() {
                    return Err(ErrorCode::Eof);
                }
                return Ok(line);
            }
            Err(e) => return Err(e),
        }

        if byte[0] == b'\n' {
            return Ok(line);
        }

        if flags.contains(LineFlags::UTF8) {
            let lead = byte[0];
            let extra = utf8_continuation_count(lead)?;
            if extra == 0 {
                line.push(lead as char);
                continue;
            }
            let mut seq = vec![lead];
            for _ in 0..extra {
                let mut cont = [0u8; 1];
                match stream.read(&mut cont) {
                    Ok(_) => seq.push(cont[0]),
                    Err(ErrorCode::Eof) | Err(ErrorCode::Closed) => {
                        return Err(ErrorCode::BadArg)
                    }
                    Err(e) => return Err(e),
                }
            }
            let s = std::str::from_utf8(&seq).map_err(|_| ErrorCode::BadArg)?;
            line.push_str(s);
        } else {
            line.push(byte[0] as char);
        }
    }
}

/// Number of continuation bytes implied by a UTF-8 lead byte, or an error
/// if `lead` is not a valid lead byte (a stray continuation byte or one of
/// the two bytes the encoding never uses).
fn utf8_continuation_count(lead: u8) -> Result<usize> {
    if lead & 0x80 == 0 {
        Ok(0)
    } else if lead & 0xE0 == 0xC0 {
        Ok(1)
    } else if lead & 0xF0 == 0xE0 {
        Ok(2)
    } else if lead & 0xF8 == 0xF0 {
        Ok(3)
    } else {
        Err(ErrorCode::BadArg)
    }
}

/// Writes a pre-rendered buffer in one logical call, looping on short
/// writes, exactly as `write_all` does; retained as a separate entry
/// point because callers render with `format!`/`write!` rather than a C
/// varargs format string.
///
/// A short write that leaves bytes unsent after the underlying `write`
/// reports `Ok(0)` surfaces as [`ErrorCode::Internal`], matching the
/// contract `Stream::write_all` already implements.
pub fn printf(stream: &mut dyn Stream, rendered: &str) -> Result<()> {
    stream.write_all(rendered.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe_stream::PipeStream;
    use std::os::unix::io::RawFd;

    fn make_pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn reads_single_lf_terminated_line() {
        let (r, w) = make_pipe();
        let mut writer = unsafe { PipeStream::from_raw_fds(None, Some(w)) };
        let mut reader = unsafe { PipeStream::from_raw_fds(Some(r), None) };
        reader.set_timeout(1000);
        writer.write_all(b"hello\nworld").unwrap();
        writer.destroy().unwrap();

        let line = read_line(&mut reader, LineFlags::empty()).unwrap();
        assert_eq!(line, "hello");
        let line2 = read_line(&mut reader, LineFlags::empty()).unwrap();
        assert_eq!(line2, "world");
        assert_eq!(
            read_line(&mut reader, LineFlags::empty()).unwrap_err(),
            ErrorCode::Eof
        );
    }

    #[test]
    fn keeps_cr_before_lf() {
        let (r, w) = make_pipe();
        let mut writer = unsafe { PipeStream::from_raw_fds(None, Some(w)) };
        let mut reader = unsafe { PipeStream::from_raw_fds(Some(r), None) };
        reader.set_timeout(1000);
        writer.write_all(b"hi\r\n").unwrap();
        writer.destroy().unwrap();
        assert_eq!(read_line(&mut reader, LineFlags::empty()).unwrap(), "hi\r");
    }

    #[test]
    fn utf8_flag_reassembles_multi_byte_code_points() {
        let (r, w) = make_pipe();
        let mut writer = unsafe { PipeStream::from_raw_fds(None, Some(w)) };
        let mut reader = unsafe { PipeStream::from_raw_fds(Some(r), None) };
        reader.set_timeout(1000);
        writer.write_all("héllo\n".as_bytes()).unwrap();
        writer.destroy().unwrap();
        assert_eq!(read_line(&mut reader, LineFlags::UTF8).unwrap(), "héllo");
    }

    #[test]
    fn without_utf8_flag_bytes_are_latin1_promoted() {
        let (r, w) = make_pipe();
        let mut writer = unsafe { PipeStream::from_raw_fds(None, Some(w)) };
        let mut reader = unsafe { PipeStream::from_raw_fds(Some(r), None) };
        reader.set_timeout(1000);
        // 0xE9 is Latin-1 'é', which is not valid UTF-8 on its own.
        writer.write_all(&[0xE9, b'\n']).unwrap();
        writer.destroy().unwrap();
        assert_eq!(read_line(&mut reader, LineFlags::empty()).unwrap(), "é");
    }

    #[test]
    fn printf_writes_rendered_buffer() {
        let (r, w) = make_pipe();
        let mut writer = unsafe { PipeStream::from_raw_fds(None, Some(w)) };
        let mut reader = unsafe { PipeStream::from_raw_fds(Some(r), None) };
        reader.set_timeout(1000);
        printf(&mut writer, &format!("{} items", 42)).unwrap();
        writer.destroy().unwrap();
        let mut buf = [0u8; 32];
        let mut total = 0;
        loop {
            match reader.read(&mut buf[total..]) {
                Ok(n) => total += n,
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }
        assert_eq!(&buf[..total], b"42 items");
    }
}
