//! Family-tagged L3/L4 address value, and hostname resolution.

use crate::error::{ErrorCode, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Network layer (L3) family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Net {
    Ipv4,
    Ipv6,
}

/// Transport layer (L4) protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Address payload, family-tagged by the enclosing [`NetAddr::net`].
///
/// The IPv6 words are stored host-order, **low-index-least-significant** —
/// word 0 holds the least significant 16 bits of the address. This mirrors
/// `convert_ipv6` in the original C implementation
/// (`original_source/os/src/bsdsock/addr_v6.c`) exactly; it is a documented
/// quirk, not a bug, and callers must not "normalize" it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrBits {
    V4(u32),
    V6([u16; 8]),
}

/// A family-tagged L3/L4 address value.
///
/// Broadcast, loopback and "any" are not distinct types: callers set the
/// fields themselves, same as the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddr {
    pub net: Net,
    pub transport: Transport,
    pub port: u16,
    pub addr: AddrBits,
}

impl NetAddr {
    pub fn new_v4(addr: Ipv4Addr, port: u16, transport: Transport) -> Self {
        NetAddr {
            net: Net::Ipv4,
            transport,
            port,
            addr: AddrBits::V4(u32::from(addr)),
        }
    }

    pub fn new_v6(addr: Ipv6Addr, port: u16, transport: Transport) -> Self {
        NetAddr {
            net: Net::Ipv6,
            transport,
            port,
            addr: AddrBits::V6(encode_v6_words(addr)),
        }
    }

    /// Decodes a `std::net::SocketAddr` into a [`NetAddr`] for the given
    /// transport. This is the exact inverse of [`NetAddr::to_std`].
    pub fn from_std(addr: SocketAddr, transport: Transport) -> Self {
        match addr {
            SocketAddr::V4(v4) => NetAddr::new_v4(*v4.ip(), v4.port(), transport),
            SocketAddr::V6(v6) => NetAddr::new_v6(*v6.ip(), v6.port(), transport),
        }
    }

    /// Encodes this address back into a `std::net::SocketAddr`.
    pub fn to_std(self) -> SocketAddr {
        match self.addr {
            AddrBits::V4(bits) => SocketAddr::new(IpAddr::V4(Ipv4Addr::from(bits)), self.port),
            AddrBits::V6(words) => {
                SocketAddr::new(IpAddr::V6(decode_v6_words(words)), self.port)
            }
        }
    }

    /// True if this is an IPv4-mapped IPv6 address (`::ffff:0:0/96`), used
    /// by the IPv6-only enforcement on TCP/UDP servers (spec §4.L/§4.M).
    pub fn is_ipv4_mapped(&self) -> bool {
        match self.addr {
            AddrBits::V4(_) => false,
            AddrBits::V6(words) => {
                // host-order words 7..3 (the high 80 bits) are 0, word 2 is
                // 0xFFFF; words 1/0 carry the mapped IPv4 payload.
                words[7] == 0
                    && words[6] == 0
                    && words[5] == 0
                    && words[4] == 0
                    && words[3] == 0
                    && words[2] == 0xFFFF
            }
        }
    }
}

/// Reverse-word-order packing used throughout the original implementation.
fn encode_v6_words(addr: Ipv6Addr) -> [u16; 8] {
    let segments = addr.segments(); // network/big-endian order, index 0 = most significant.
    let mut words = [0u16; 8];
    for i in 0..8 {
        words[7 - i] = segments[i];
    }
    words
}

fn decode_v6_words(words: [u16; 8]) -> Ipv6Addr {
    let mut segments = [0u16; 8];
    for i in 0..8 {
        segments[i] = words[7 - i];
    }
    Ipv6Addr::from(segments)
}

/// Hint restricting which address families [`resolve`] may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoHint {
    Ipv4Only,
    Ipv6Only,
    Either,
}

impl ProtoHint {
    fn allows(self, net: Net) -> bool {
        match (self, net) {
            (ProtoHint::Either, _) => true,
            (ProtoHint::Ipv4Only, Net::Ipv4) => true,
            (ProtoHint::Ipv6Only, Net::Ipv6) => true,
            _ => false,
        }
    }
}

/// Resolves `hostname` to up to `output.len()` addresses, following spec
/// §4.C/§4.K:
///
/// 1. If `hostname` parses as a dotted-quad IPv4 literal and the hint
///    allows IPv4, produce exactly that one address.
/// 2. Else if it parses as an IPv6 literal (with optional `::` elision and
///    optional embedded IPv4 tail — `Ipv6Addr::from_str` already implements
///    this grammar) and the hint allows IPv6, produce exactly that one
///    address.
/// 3. Else consult the platform resolver, deduplicate by `(family, bits)`,
///    filter by hint, and return up to `output.len()` matches.
///
/// Returns the number of addresses written into `output`.
pub fn resolve(
    hostname: &str,
    transport: Transport,
    hint: ProtoHint,
    output: &mut [NetAddr],
) -> Result<usize> {
    if output.is_empty() {
        return Ok(0);
    }

    if let Ok(v4) = hostname.parse::<Ipv4Addr>() {
        if hint.allows(Net::Ipv4) {
            output[0] = NetAddr::new_v4(v4, 0, transport);
            return Ok(1);
        }
        return Err(ErrorCode::BadNetAddr);
    }

    if let Ok(v6) = hostname.parse::<Ipv6Addr>() {
        if hint.allows(Net::Ipv6) {
            output[0] = NetAddr::new_v6(v6, 0, transport);
            return Ok(1);
        }
        return Err(ErrorCode::BadNetAddr);
    }

    // Symbolic name: consult the platform resolver. `ToSocketAddrs` requires
    // a port; 0 is fine since only the address bits are used below.
    let lookup = format!("{hostname}:0");
    let results = lookup
        .to_socket_addrs()
        .map_err(|_| ErrorCode::HostUnreachable)?;

    let mut count = 0usize;
    let mut seen: Vec<NetAddr> = Vec::new();
    for sockaddr in results {
        let candidate = NetAddr::from_std(sockaddr, transport);
        if !hint.allows(candidate.net) {
            continue;
        }
        if seen.iter().any(|s| s.net == candidate.net && s.addr == candidate.addr) {
            continue;
        }
        seen.push(candidate);
        if count >= output.len() {
            break;
        }
        output[count] = candidate;
        count += 1;
    }

    Ok(count)
}
