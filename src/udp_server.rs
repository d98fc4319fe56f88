//! UDP packet server: bind/connect combinations, send/receive with
//! optional per-call addressing.

use crate::addr::{NetAddr, Transport};
use crate::error::{ErrorCode, Result};
use crate::fd_util::{retry_on_eintr, wait_for_fd};
use std::net::UdpSocket;
use std::os::unix::io::AsRawFd;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketServerFlags: u32 {
        const IPV6_ONLY = 0x01;
    }
}

/// A UDP socket that may be bound, connected, or both.
pub struct PacketServer {
    socket: UdpSocket,
    connected: bool,
    timeout_ms: u32,
    flags: PacketServerFlags,
}

impl PacketServer {
    /// At least one of `local_addr`/`remote_addr` must be given. `bind` is
    /// issued for a local address, `connect` for a remote one; if both are
    /// given, their net families must agree. `SO_REUSEADDR`/`SO_REUSEPORT`
    /// are set before bind, matching `bind_socket` in
    /// `original_source/os/src/unix/os.c`.
    pub fn packet_server(
        local_addr: Option<NetAddr>,
        remote_addr: Option<NetAddr>,
        flags: PacketServerFlags,
    ) -> Result<Self> {
        if local_addr.is_none() && remote_addr.is_none() {
            return Err(ErrorCode::BadArg);
        }
        if let (Some(l), Some(r)) = (local_addr, remote_addr) {
            if l.net != r.net {
                return Err(ErrorCode::BadArg);
            }
        }

        let bind_addr = local_addr
            .map(|a| a.to_std())
            .or_else(|| remote_addr.map(|r| wildcard_for(r)))
            .unwrap();

        let domain = if bind_addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let raw = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
            .map_err(|e| ErrorCode::from_io(&e))?;
        raw.set_reuse_address(true)
            .map_err(|e| ErrorCode::from_io(&e))?;
        raw.set_reuse_port(true)
            .map_err(|e| ErrorCode::from_io(&e))?;
        raw.bind(&bind_addr.into())
            .map_err(|e| ErrorCode::from_io(&e))?;
        let socket: UdpSocket = raw.into();

        let mut connected = false;
        if let Some(remote) = remote_addr {
            socket
                .connect(remote.to_std())
                .map_err(|e| ErrorCode::from_io(&e))?;
            connected = true;
        }

        Ok(PacketServer {
            socket,
            connected,
            timeout_ms: 0,
            flags,
        })
    }

    pub fn set_timeout(&mut self, ms: u32) {
        self.timeout_ms = ms;
    }

    /// Sends `buf`. On a never-`connect`-ed socket, `addr` must be
    /// supplied; on a connected socket, `addr` is ignored (same as the
    /// original, which never second-guesses the caller's choice). Under
    /// [`PacketServerFlags::IPV6_ONLY`] a destination in the IPv4-mapped
    /// range is rejected with [`ErrorCode::BadNetAddr`] before the
    /// datagram is sent, matching the per-datagram enforcement in
    /// `original_source/os/src/unix/packetserver.c`'s `udp_send`.
    pub fn send(&self, buf: &[u8], addr: Option<NetAddr>) -> Result<usize> {
        let timeout = crate::stream::ms_to_duration(self.timeout_ms);
        wait_for_fd(self.socket.as_raw_fd(), timeout, true)?;

        let n = if self.connected {
            retry_eintr_io(|| self.socket.send(buf))?
        } else {
            let target = addr.ok_or(ErrorCode::BadArg)?;
            if self.flags.contains(PacketServerFlags::IPV6_ONLY) && target.is_ipv4_mapped() {
                return Err(ErrorCode::BadNetAddr);
            }
            retry_eintr_io(|| self.socket.send_to(buf, target.to_std()))?
        };
        Ok(n)
    }

    /// Receives one datagram into `buf`. If `addr_out` is `Some`, the
    /// sender's address is written there. Under
    /// [`PacketServerFlags::IPV6_ONLY`], datagrams from an IPv4-mapped
    /// sender are silently discarded and the wait for a datagram retried,
    /// bounded by [`MAX_EINTR_RETRIES`] discards, matching `udp_receive`'s
    /// per-datagram rejection in
    /// `original_source/os/src/unix/packetserver.c`.
    pub fn receive(&self, buf: &mut [u8], mut addr_out: Option<&mut NetAddr>) -> Result<usize> {
        let timeout = crate::stream::ms_to_duration(self.timeout_ms);
        let ipv6_only = self.flags.contains(PacketServerFlags::IPV6_ONLY);

        let mut discarded = 0;
        loop {
            wait_for_fd(self.socket.as_raw_fd(), timeout, false)?;
            let (n, from) = retry_eintr_io(|| self.socket.recv_from(buf))?;
            let sender = NetAddr::from_std(from, Transport::Udp);

            if ipv6_only && sender.is_ipv4_mapped() {
                discarded += 1;
                if discarded >= MAX_EINTR_RETRIES {
                    return Err(ErrorCode::BadNetAddr);
                }
                continue;
            }

            if let Some(slot) = addr_out.as_deref_mut() {
                *slot = sender;
            }
            return Ok(n);
        }
    }

    pub fn local_address(&self) -> Result<NetAddr> {
        let sockaddr = self.socket.local_addr().map_err(|e| ErrorCode::from_io(&e))?;
        Ok(NetAddr::from_std(sockaddr, Transport::Udp))
    }
}

fn wildcard_for(addr: NetAddr) -> std::net::SocketAddr {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
    match addr.net {
        crate::addr::Net::Ipv4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        crate::addr::Net::Ipv6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

const MAX_EINTR_RETRIES: u32 = 3;

fn retry_eintr_io<T, F: FnMut() -> std::io::Result<T>>(mut op: F) -> Result<T> {
    let mut attempts = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.raw_os_error() == Some(libc::EINTR) && attempts < MAX_EINTR_RETRIES => {
                attempts += 1;
                continue;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(ErrorCode::Timeout),
            Err(e) => return Err(ErrorCode::from_io(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Net;
    use std::net::Ipv4Addr;

    #[test]
    fn requires_at_least_one_address() {
        let err = PacketServer::packet_server(None, None, PacketServerFlags::empty()).unwrap_err();
        assert_eq!(err, ErrorCode::BadArg);
    }

    #[test]
    fn mismatched_families_are_rejected() {
        let local = NetAddr::new_v4(Ipv4Addr::UNSPECIFIED, 0, Transport::Udp);
        let remote = NetAddr::new_v6(std::net::Ipv6Addr::LOCALHOST, 9, Transport::Udp);
        let err =
            PacketServer::packet_server(Some(local), Some(remote), PacketServerFlags::empty())
                .unwrap_err();
        assert_eq!(err, ErrorCode::BadArg);
    }

    #[test]
    fn bound_pair_exchanges_a_datagram() {
        let a_addr = NetAddr::new_v4(Ipv4Addr::LOCALHOST, 0, Transport::Udp);
        let mut a = PacketServer::packet_server(Some(a_addr), None, PacketServerFlags::empty()).unwrap();
        let a_port = a.local_address().unwrap().port;

        let b_addr = NetAddr::new_v4(Ipv4Addr::LOCALHOST, 0, Transport::Udp);
        let mut b = PacketServer::packet_server(Some(b_addr), None, PacketServerFlags::empty()).unwrap();
        b.set_timeout(1000);

        let target = NetAddr::new_v4(Ipv4Addr::LOCALHOST, a_port, Transport::Udp);
        b.send(b"ping", Some(target)).unwrap();

        let mut buf = [0u8; 16];
        let mut from = NetAddr::new_v4(Ipv4Addr::UNSPECIFIED, 0, Transport::Udp);
        a.set_timeout(1000);
        let n = a.receive(&mut buf, Some(&mut from)).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from.net, Net::Ipv4);
    }

    #[test]
    fn ipv6_only_send_rejects_mapped_destination() {
        let local = NetAddr::new_v6(std::net::Ipv6Addr::LOCALHOST, 0, Transport::Udp);
        let server =
            PacketServer::packet_server(Some(local), None, PacketServerFlags::IPV6_ONLY).unwrap();
        let mapped = std::net::Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc0a8, 0x0101);
        let target = NetAddr::new_v6(mapped, 9, Transport::Udp);
        assert_eq!(
            server.send(b"hi", Some(target)).unwrap_err(),
            ErrorCode::BadNetAddr
        );
    }

    #[test]
    fn connected_send_ignores_supplied_address() {
        let server_addr = NetAddr::new_v4(Ipv4Addr::LOCALHOST, 0, Transport::Udp);
        let server =
            PacketServer::packet_server(Some(server_addr), None, PacketServerFlags::empty())
                .unwrap();
        let server_port = server.local_address().unwrap().port;

        let remote = NetAddr::new_v4(Ipv4Addr::LOCALHOST, server_port, Transport::Udp);
        let client = PacketServer::packet_server(None, Some(remote), PacketServerFlags::empty())
            .unwrap();
        assert!(client.connected);
        client.send(b"hi", None).unwrap();
    }
}
