//! Listening TCP server: bind/listen/accept with IPv6-only enforcement.

use crate::addr::NetAddr;
use crate::error::{ErrorCode, Result};
use crate::fd_util::wait_for_fd;
use crate::socket_stream::SocketStream;
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ServerFlags: u32 {
        /// Reject accepted peers in the IPv4-mapped range (`::ffff:0:0/96`)
        /// instead of handing them to the caller.
        const IPV6_ONLY = 0x01;
    }
}

/// A bound, listening TCP socket.
pub struct TcpServer {
    listener: TcpListener,
    flags: ServerFlags,
}

impl TcpServer {
    /// Binds `local_addr`, starts listening with `backlog` as the pending
    /// connection queue size, and keeps `SO_REUSEADDR`/`SO_REUSEPORT` set
    /// throughout the server's lifetime, matching `bind_socket` in
    /// `original_source/os/src/unix/os.c`.
    pub fn listen(local_addr: NetAddr, backlog: u32, flags: ServerFlags) -> Result<Self> {
        let std_addr = local_addr.to_std();

        let domain = if std_addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
            .map_err(|e| ErrorCode::from_io(&e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| ErrorCode::from_io(&e))?;
        socket
            .set_reuse_port(true)
            .map_err(|e| ErrorCode::from_io(&e))?;
        socket
            .bind(&std_addr.into())
            .map_err(|e| ErrorCode::from_io(&e))?;
        socket
            .listen(backlog.max(1) as i32)
            .map_err(|e| ErrorCode::from_io(&e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ErrorCode::from_io(&e))?;

        Ok(TcpServer {
            listener: socket.into(),
            flags,
        })
    }

    /// Waits up to `timeout_ms` (0 = forever) for a pending connection,
    /// accepts it, and wraps it as a [`SocketStream`]. If [`ServerFlags::IPV6_ONLY`]
    /// is set and the peer's address is IPv4-mapped, the connection is
    /// closed and accept retries against the remaining timeout budget.
    pub fn accept(&self, timeout_ms: u32) -> Result<SocketStream> {
        let deadline = if timeout_ms == 0 {
            None
        } else {
            Some(std::time::Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
        };

        loop {
            let remaining = match deadline {
                None => None,
                Some(d) => {
                    let now = std::time::Instant::now();
                    if now >= d {
                        return Err(ErrorCode::Timeout);
                    }
                    Some(d - now)
                }
            };
            wait_for_fd(self.listener.as_raw_fd(), remaining, false)?;

            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(ErrorCode::from_io(&e)),
            };

            if self.flags.contains(ServerFlags::IPV6_ONLY) {
                let na = NetAddr::from_std(peer, crate::addr::Transport::Tcp);
                if na.is_ipv4_mapped() {
                    tracing::debug!(peer = %peer, "rejecting ipv4-mapped peer under ipv6-only policy");
                    drop(stream);
                    continue;
                }
            }

            let _ = stream.set_nonblocking(false);
            return Ok(SocketStream::from_tcp(stream));
        }
    }

    pub fn local_address(&self) -> Result<NetAddr> {
        let sockaddr = self
            .listener
            .local_addr()
            .map_err(|e| ErrorCode::from_io(&e))?;
        Ok(NetAddr::from_std(sockaddr, crate::addr::Transport::Tcp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Transport;
    use crate::stream::Stream;
    use std::net::{Ipv4Addr, TcpStream};

    #[test]
    fn accepts_a_connection_and_echoes() {
        let addr = NetAddr::new_v4(Ipv4Addr::LOCALHOST, 0, Transport::Tcp);
        let server = TcpServer::listen(addr, 16, ServerFlags::empty()).unwrap();
        let port = server.local_address().unwrap().port;

        let handle = std::thread::spawn(move || {
            let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
            use std::io::{Read, Write};
            client.write_all(b"ping").unwrap();
            let mut buf = [0u8; 8];
            let n = client.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"ping");
        });

        let mut accepted = server.accept(1000).unwrap();
        let mut buf = [0u8; 8];
        let n = accepted.read(&mut buf).unwrap();
        accepted.write_all(&buf[..n]).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn accept_times_out_with_no_pending_connection() {
        let addr = NetAddr::new_v4(Ipv4Addr::LOCALHOST, 0, Transport::Tcp);
        let server = TcpServer::listen(addr, 16, ServerFlags::empty()).unwrap();
        assert_eq!(server.accept(50).unwrap_err(), ErrorCode::Timeout);
    }
}
