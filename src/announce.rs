//! Gratuitous ARP and unsolicited Neighbor Advertisement emission.
//!
//! A VF handed to a new sandbox frequently reuses an IP address that
//! neighbors still associate with the previous sandbox's link-layer
//! address. The kernel only announces on link transitions, which it never
//! sees here, so the new binding is pushed out explicitly: one gratuitous
//! ARP per IPv4 address (RFC 826) and one unsolicited, overriding Neighbor
//! Advertisement per IPv6 address (RFC 4861 §4.4) on the container
//! interface. These packets refresh neighbor caches faster; losing them
//! costs performance, not correctness, so callers swallow failures.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::warn;

use crate::error::Error;
use crate::types::IpConfig;

const ETH_P_ARP: u16 = 0x0806;
const ETH_P_IPV6: u16 = 0x86dd;

/// Announces every address in `ips` on `ifname`.
/// Must run inside the namespace owning the interface. Per-address failures
/// are logged and do not abort the remaining announcements.
pub fn announce_ips(ifname: &str, src_mac: &[u8; 6], ips: &[IpConfig]) {
    for ip_conf in ips {
        // Addresses come in CIDR notation from the IPAM result.
        let addr = match ip_conf
            .address
            .split('/')
            .next()
            .unwrap_or_default()
            .parse::<IpAddr>()
        {
            Ok(addr) => addr,
            Err(e) => {
                warn!("not announcing unparsable address {}: {e}", ip_conf.address);
                continue;
            }
        };
        let result = match addr {
            IpAddr::V4(v4) => send_frame(ifname, ETH_P_ARP, &gratuitous_arp(src_mac, v4)),
            IpAddr::V6(v6) => send_frame(ifname, ETH_P_IPV6, &unsolicited_na(src_mac, v6)),
        };
        if let Err(e) = result {
            warn!("failed to announce {addr} on {ifname}: {e}");
        }
    }
}

/// A gratuitous ARP request: sender and target protocol address are both the
/// announced address, broadcast on the wire.
fn gratuitous_arp(src_mac: &[u8; 6], addr: Ipv4Addr) -> Vec<u8> {
    let mut frame = Vec::with_capacity(42);
    // Ethernet header
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(src_mac);
    frame.extend_from_slice(&ETH_P_ARP.to_be_bytes());
    // ARP payload
    frame.extend_from_slice(&1u16.to_be_bytes()); // htype: Ethernet
    frame.extend_from_slice(&0x0800u16.to_be_bytes()); // ptype: IPv4
    frame.push(6); // hlen
    frame.push(4); // plen
    frame.extend_from_slice(&1u16.to_be_bytes()); // oper: request
    frame.extend_from_slice(src_mac); // sender hardware address
    frame.extend_from_slice(&addr.octets()); // sender protocol address
    frame.extend_from_slice(&[0; 6]); // target hardware address
    frame.extend_from_slice(&addr.octets()); // target protocol address
    frame
}

/// An unsolicited Neighbor Advertisement to the all-nodes multicast group
/// with the override flag set, carrying the target link-layer address
/// option.
fn unsolicited_na(src_mac: &[u8; 6], addr: Ipv6Addr) -> Vec<u8> {
    let all_nodes = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
    let mut icmp = Vec::with_capacity(32);
    icmp.push(136); // type: Neighbor Advertisement
    icmp.push(0); // code
    icmp.extend_from_slice(&[0, 0]); // checksum, filled below
    icmp.extend_from_slice(&0x2000_0000u32.to_be_bytes()); // flags: override
    icmp.extend_from_slice(&addr.octets()); // target address
    icmp.push(2); // option: target link-layer address
    icmp.push(1); // option length in units of 8 bytes
    icmp.extend_from_slice(src_mac);

    let checksum = icmpv6_checksum(&addr, &all_nodes, &icmp);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

    let mut frame = Vec::with_capacity(14 + 40 + icmp.len());
    // Ethernet header; 33:33:xx is the IPv6 multicast MAC prefix.
    frame.extend_from_slice(&[0x33, 0x33, 0x00, 0x00, 0x00, 0x01]);
    frame.extend_from_slice(src_mac);
    frame.extend_from_slice(&ETH_P_IPV6.to_be_bytes());
    // IPv6 header
    frame.extend_from_slice(&[0x60, 0, 0, 0]); // version 6, no traffic class/flow
    frame.extend_from_slice(&(icmp.len() as u16).to_be_bytes());
    frame.push(58); // next header: ICMPv6
    frame.push(255); // hop limit, required for NDP
    frame.extend_from_slice(&addr.octets());
    frame.extend_from_slice(&all_nodes.octets());
    frame.extend_from_slice(&icmp);
    frame
}

/// ICMPv6 checksum over the IPv6 pseudo-header and the message body.
fn icmpv6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, icmp: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut add_bytes = |bytes: &[u8]| {
        let mut chunks = bytes.chunks_exact(2);
        for chunk in &mut chunks {
            sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        if let [last] = chunks.remainder() {
            sum += u32::from(u16::from_be_bytes([*last, 0]));
        }
    };
    add_bytes(&src.octets());
    add_bytes(&dst.octets());
    add_bytes(&(icmp.len() as u32).to_be_bytes());
    add_bytes(&[0, 0, 0, 58]);
    add_bytes(icmp);
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Sends one raw Ethernet frame out of `ifname` through an AF_PACKET socket.
fn send_frame(ifname: &str, proto: u16, frame: &[u8]) -> Result<(), Error> {
    let ifindex = nix::net::if_::if_nametoindex(ifname)
        .map_err(|e| Error::IOFailure(format!("failed to resolve index of {ifname}: {e}")))?;

    // SAFETY: plain socket/sendto/close syscalls on a locally owned fd; the
    // sockaddr_ll is zero-initialized and sized by the libc type.
    unsafe {
        let fd = libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW,
            i32::from(proto.to_be()),
        );
        if fd < 0 {
            return Err(Error::IOFailure(format!(
                "failed to open packet socket: {}",
                std::io::Error::last_os_error()
            )));
        }

        let mut addr: libc::sockaddr_ll = std::mem::zeroed();
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = proto.to_be();
        addr.sll_ifindex = ifindex as i32;
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(&frame[..6]);

        let rc = libc::sendto(
            fd,
            frame.as_ptr().cast(),
            frame.len(),
            0,
            std::ptr::addr_of!(addr).cast(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        );
        let send_err = std::io::Error::last_os_error();
        libc::close(fd);
        if rc < 0 {
            return Err(Error::IOFailure(format!(
                "failed to send announcement on {ifname}: {send_err}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::{gratuitous_arp, icmpv6_checksum, unsolicited_na};

    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

    #[test]
    fn gratuitous_arp_layout() {
        let frame = gratuitous_arp(&MAC, Ipv4Addr::new(10, 1, 0, 5));
        assert_eq!(frame.len(), 42);
        // Broadcast destination, our source.
        assert_eq!(&frame[0..6], &[0xff; 6]);
        assert_eq!(&frame[6..12], &MAC);
        assert_eq!(&frame[12..14], &[0x08, 0x06]);
        // Request with sender == target protocol address.
        assert_eq!(&frame[20..22], &[0x00, 0x01]);
        assert_eq!(&frame[22..28], &MAC);
        assert_eq!(&frame[28..32], &[10, 1, 0, 5]);
        assert_eq!(&frame[32..38], &[0; 6]);
        assert_eq!(&frame[38..42], &[10, 1, 0, 5]);
    }

    #[test]
    fn unsolicited_na_layout() {
        let addr: Ipv6Addr = "2001:db8::5".parse().unwrap();
        let frame = unsolicited_na(&MAC, addr);
        assert_eq!(frame.len(), 14 + 40 + 32);
        // All-nodes multicast destination.
        assert_eq!(&frame[0..6], &[0x33, 0x33, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&frame[12..14], &[0x86, 0xdd]);
        // IPv6 header: ICMPv6, hop limit 255, src is the announced address.
        assert_eq!(frame[20], 58);
        assert_eq!(frame[21], 255);
        assert_eq!(&frame[22..38], &addr.octets());
        // NA with the override flag and the target link-layer option.
        let icmp = &frame[54..];
        assert_eq!(icmp[0], 136);
        assert_eq!(&icmp[4..8], &[0x20, 0, 0, 0]);
        assert_eq!(&icmp[8..24], &addr.octets());
        assert_eq!(icmp[24], 2);
        assert_eq!(icmp[25], 1);
        assert_eq!(&icmp[26..32], &MAC);
    }

    #[test]
    fn na_checksum_verifies() {
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        let frame = unsolicited_na(&MAC, addr);
        let all_nodes: Ipv6Addr = "ff02::1".parse().unwrap();
        // Summing a message with a correct checksum yields zero.
        let icmp = &frame[54..];
        let mut zeroed = icmp.to_vec();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let expected = u16::from_be_bytes([icmp[2], icmp[3]]);
        assert_eq!(icmpv6_checksum(&addr, &all_nodes, &zeroed), expected);
    }

    #[test]
    fn checksum_handles_odd_length() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let dst: Ipv6Addr = "ff02::1".parse().unwrap();
        // Equality here just exercises the odd-tail path for panics.
        let sum = icmpv6_checksum(&src, &dst, &[136, 0, 0]);
        assert_ne!(sum, 0);
    }
}
