//! Stream over connected TCP/UDP sockets.

use crate::addr::{NetAddr, Transport};
use crate::error::{ErrorCode, Result};
use crate::stream::{ms_to_duration, SocketQuery, Stream, StreamType};
use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::os::unix::io::AsRawFd;

/// The concrete transport backing a [`SocketStream`].
#[derive(Debug)]
enum Inner {
    Tcp(TcpStream),
    /// A `connect`-ed UDP socket used as a byte stream; each `write` is one
    /// datagram and each `read` drains one datagram (spec §4.D notes that
    /// `TooLarge` on a packet-oriented socket means "didn't fit one
    /// datagram").
    Udp(UdpSocket),
}

/// A stream over a connected TCP or UDP socket.
#[derive(Debug)]
pub struct SocketStream {
    inner: Inner,
    transport: Transport,
    destroyed: bool,
}

impl SocketStream {
    pub fn from_tcp(stream: TcpStream) -> Self {
        SocketStream {
            inner: Inner::Tcp(stream),
            transport: Transport::Tcp,
            destroyed: false,
        }
    }

    pub fn from_connected_udp(socket: UdpSocket) -> Self {
        SocketStream {
            inner: Inner::Udp(socket),
            transport: Transport::Udp,
            destroyed: false,
        }
    }
}

impl Stream for SocketStream {
    fn stream_type(&self) -> StreamType {
        StreamType::Socket {
            udp: matches!(self.transport, Transport::Udp),
        }
    }

    fn set_timeout(&mut self, ms: u32) {
        let dur = ms_to_duration(ms);
        match &self.inner {
            Inner::Tcp(s) => {
                let _ = s.set_read_timeout(dur);
                let _ = s.set_write_timeout(dur);
            }
            Inner::Udp(s) => {
                let _ = s.set_read_timeout(dur);
                let _ = s.set_write_timeout(dur);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match &mut self.inner {
            Inner::Tcp(s) => s.read(buf),
            Inner::Udp(s) => s.recv(buf),
        };
        match result {
            Ok(0) => Err(ErrorCode::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(ErrorCode::Timeout),
            Err(e) => Err(ErrorCode::from_io(&e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match &mut self.inner {
            Inner::Tcp(s) => s.write(buf),
            Inner::Udp(s) => s.send(buf),
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(ErrorCode::Timeout),
            Err(e) if e.raw_os_error() == Some(libc::EMSGSIZE) => Err(ErrorCode::TooLarge),
            Err(e) => Err(ErrorCode::from_io(&e)),
        }
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        if let Inner::Tcp(s) = &self.inner {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn raw_fd_for_splice(&self, _writable: bool) -> Option<std::os::unix::io::RawFd> {
        // A connected socket is full-duplex on one fd regardless of
        // direction, matching `fds[0] = fds[1] = readfd/writefd` for
        // `TL_STREAM_TYPE_SOCK` in the original's `tl_unix_iostream_fd`.
        match &self.inner {
            Inner::Tcp(s) => Some(s.as_raw_fd()),
            Inner::Udp(s) => Some(s.as_raw_fd()),
        }
    }
}

impl SocketQuery for SocketStream {
    fn peer_address(&self) -> Result<NetAddr> {
        let sockaddr = match &self.inner {
            Inner::Tcp(s) => s.peer_addr(),
            Inner::Udp(s) => s.peer_addr(),
        }
        .map_err(|e| ErrorCode::from_io(&e))?;
        Ok(NetAddr::from_std(sockaddr, self.transport))
    }

    fn local_address(&self) -> Result<NetAddr> {
        let sockaddr = match &self.inner {
            Inner::Tcp(s) => s.local_addr(),
            Inner::Udp(s) => s.local_addr(),
        }
        .map_err(|e| ErrorCode::from_io(&e))?;
        Ok(NetAddr::from_std(sockaddr, self.transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_echo_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = std::thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            let mut stream = SocketStream::from_tcp(sock);
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(&buf[..n]).unwrap();
        });

        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut stream = SocketStream::from_tcp(client);
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        handle.join().unwrap();
    }

    #[test]
    fn read_timeout_is_observable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _keep_alive = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (sock, _) = listener.accept().unwrap();
        let mut stream = SocketStream::from_tcp(sock);
        stream.set_timeout(50);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap_err(), ErrorCode::Timeout);
    }
}
