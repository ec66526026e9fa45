//! Typed link management over a synchronous RTNL socket.
//!
//! The [`LinkManager`] trait is the narrow surface the VF manager drives:
//! link lookup, administrative state, rename, hardware address, namespace
//! moves, the PF-mediated VF attribute setters, and the address/route
//! binding applied inside the container namespace. [`Rtnl`] is the kernel
//! implementation; tests substitute an in-memory one.
//!
//! VF attributes travel inside the nested `IFLA_VFINFO_LIST` attribute,
//! which the route packet crate carries as raw bytes, so the nested
//! attribute layout (one C struct per `IFLA_VF_*` leaf) is encoded and
//! parsed here.

use std::net::IpAddr;
use std::os::unix::io::RawFd;

use ipnetwork::IpNetwork;
use netlink_packet_route::{
    constants::{
        AF_INET, AF_INET6, RTN_UNICAST, RTPROT_STATIC, RT_SCOPE_LINK, RT_SCOPE_UNIVERSE,
        RT_TABLE_MAIN,
    },
    nlas::{address, link, route},
    AddressMessage, LinkMessage, NetlinkMessage, NetlinkPayload, RouteMessage, RtnlMessage,
    IFF_UP, NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST,
};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

use crate::error::Error;

// Kernel constants the route packet crate does not model at this layer.
const RTEXT_FILTER_VF: u32 = 1;
const NLA_F_NESTED: u16 = 0x8000;
const NLA_TYPE_MASK: u16 = 0x3fff;

const IFLA_VF_INFO: u16 = 1;
const IFLA_VF_MAC: u16 = 1;
const IFLA_VF_VLAN: u16 = 2;
const IFLA_VF_SPOOFCHK: u16 = 4;
const IFLA_VF_LINK_STATE: u16 = 5;
const IFLA_VF_RATE: u16 = 6;
const IFLA_VF_TRUST: u16 = 9;
const IFLA_VF_VLAN_LIST: u16 = 12;
const IFLA_VF_VLAN_INFO: u16 = 1;

/// Attributes of one VF as reported by (or pushed to) its PF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VfInfo {
    pub id: u32,
    /// Administered MAC. All-zero when the host never set one.
    pub mac: [u8; 6],
    pub vlan: u32,
    pub qos: u32,
    /// VLAN EtherType; 0x8100 unless an 802.1ad tag was administered.
    pub vlan_proto: u16,
    pub spoofchk: bool,
    pub trust: bool,
    /// `IFLA_VF_LINK_STATE_*` encoding: 0 auto, 1 enable, 2 disable.
    pub link_state: u32,
    pub min_tx_rate: u32,
    pub max_tx_rate: u32,
}

/// A resolved link device.
#[derive(Debug, Clone, Default)]
pub struct LinkDevice {
    pub index: u32,
    pub name: String,
    /// Hardware address; absent for devices without one.
    pub hw_addr: Option<Vec<u8>>,
    /// Per-VF attributes; only populated when the lookup requested the VF
    /// table of a PF.
    pub vfs: Vec<VfInfo>,
}

/// The link operations the VF manager needs, kept narrow so tests can
/// provide an in-memory implementation.
pub trait LinkManager {
    /// Resolves a link by name.
    fn link_by_name(&self, name: &str) -> Result<LinkDevice, Error>;
    /// Resolves a link by name including its VF table.
    fn link_by_name_with_vfs(&self, name: &str) -> Result<LinkDevice, Error>;
    fn link_set_up(&self, index: u32) -> Result<(), Error>;
    fn link_set_down(&self, index: u32) -> Result<(), Error>;
    fn link_set_name(&self, index: u32, name: &str) -> Result<(), Error>;
    fn link_set_hardware_addr(&self, index: u32, addr: &[u8]) -> Result<(), Error>;
    /// Moves the link into the network namespace behind `fd`.
    fn link_set_ns_fd(&self, index: u32, fd: RawFd) -> Result<(), Error>;
    fn link_set_vf_mac(&self, pf_index: u32, vf: u32, mac: &[u8; 6]) -> Result<(), Error>;
    fn link_set_vf_vlan(
        &self,
        pf_index: u32,
        vf: u32,
        vlan: u32,
        qos: u32,
        proto: u16,
    ) -> Result<(), Error>;
    fn link_set_vf_spoofchk(&self, pf_index: u32, vf: u32, on: bool) -> Result<(), Error>;
    fn link_set_vf_trust(&self, pf_index: u32, vf: u32, on: bool) -> Result<(), Error>;
    fn link_set_vf_link_state(&self, pf_index: u32, vf: u32, state: u32) -> Result<(), Error>;
    fn link_set_vf_rate(
        &self,
        pf_index: u32,
        vf: u32,
        min_tx_rate: u32,
        max_tx_rate: u32,
    ) -> Result<(), Error>;
    /// Adds an address to a link. Must run inside the namespace owning it.
    fn addr_add(&self, index: u32, addr: &IpNetwork) -> Result<(), Error>;
    /// Adds a route through a link. Must run inside the namespace owning it.
    fn route_add(&self, index: u32, dst: &IpNetwork, gw: Option<IpAddr>) -> Result<(), Error>;
}

/// Kernel-backed [`LinkManager`]. Each operation opens its own RTNL socket,
/// so a value created before a namespace switch keeps working after it and
/// always talks to the namespace the calling thread currently occupies.
#[derive(Debug, Default)]
pub struct Rtnl;

impl Rtnl {
    fn request(
        &self,
        msg: RtnlMessage,
        flags: u16,
    ) -> Result<Vec<RtnlMessage>, Error> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::Netlink(format!("failed to open RTNL socket: {e}")))?;
        socket
            .bind_auto()
            .map_err(|e| Error::Netlink(format!("failed to bind RTNL socket: {e}")))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::Netlink(format!("failed to connect RTNL socket: {e}")))?;

        let mut packet = NetlinkMessage::from(msg);
        packet.header.flags = flags;
        packet.header.sequence_number = 1;
        packet.finalize();

        let mut buf = vec![0u8; packet.header.length as usize];
        packet.serialize(&mut buf);
        socket
            .send(&buf, 0)
            .map_err(|e| Error::Netlink(format!("failed to send RTNL request: {e}")))?;

        let mut responses = Vec::new();
        loop {
            // Sized reads: a PF with a large VF table overflows any fixed
            // receive buffer.
            let (rbuf, _addr) = socket
                .recv_from_full()
                .map_err(|e| Error::Netlink(format!("failed to read RTNL response: {e}")))?;
            let len = rbuf.len();
            let mut offset = 0;
            while offset < len {
                let reply = NetlinkMessage::<RtnlMessage>::deserialize(&rbuf[offset..len])
                    .map_err(|e| {
                        Error::Netlink(format!("failed to parse RTNL response: {e}"))
                    })?;
                let reply_len = reply.header.length as usize;
                match reply.payload {
                    NetlinkPayload::Error(err) if err.code != 0 => {
                        let io = std::io::Error::from_raw_os_error(-err.code);
                        return Err(Error::Netlink(format!("kernel refused request: {io}")));
                    }
                    // An error code of zero is the requested ack.
                    NetlinkPayload::Error(_) => return Ok(responses),
                    NetlinkPayload::Done => return Ok(responses),
                    NetlinkPayload::InnerMessage(inner) => {
                        responses.push(inner);
                        if flags & NLM_F_ACK == 0 {
                            return Ok(responses);
                        }
                    }
                    _ => {}
                }
                if reply_len == 0 {
                    break;
                }
                offset += reply_len;
            }
        }
    }

    fn get_link(&self, name: &str, with_vfs: bool) -> Result<LinkDevice, Error> {
        let mut msg = LinkMessage::default();
        msg.nlas.push(link::Nla::IfName(name.to_string()));
        if with_vfs {
            msg.nlas.push(link::Nla::ExtMask(RTEXT_FILTER_VF));
        }
        let responses = self.request(RtnlMessage::GetLink(msg), NLM_F_REQUEST)?;
        for resp in responses {
            if let RtnlMessage::NewLink(link_msg) = resp {
                return Ok(link_device_from_message(link_msg));
            }
        }
        Err(Error::Netlink(format!("link {name} not found")))
    }

    fn set_link(&self, msg: LinkMessage) -> Result<(), Error> {
        self.request(RtnlMessage::SetLink(msg), NLM_F_REQUEST | NLM_F_ACK)
            .map(|_| ())
    }

    fn set_link_flags(&self, index: u32, up: bool) -> Result<(), Error> {
        let mut msg = LinkMessage::default();
        msg.header.index = index;
        msg.header.flags = if up { IFF_UP } else { 0 };
        msg.header.change_mask = IFF_UP;
        self.set_link(msg)
    }

    fn set_vf_attr(&self, pf_index: u32, attr_kind: u16, payload: Vec<u8>) -> Result<(), Error> {
        let mut msg = LinkMessage::default();
        msg.header.index = pf_index;
        msg.nlas.push(link::Nla::VfInfoList(encode_nla(
            IFLA_VF_INFO | NLA_F_NESTED,
            &encode_nla(attr_kind, &payload),
        )));
        self.set_link(msg)
    }
}

impl LinkManager for Rtnl {
    fn link_by_name(&self, name: &str) -> Result<LinkDevice, Error> {
        self.get_link(name, false)
    }

    fn link_by_name_with_vfs(&self, name: &str) -> Result<LinkDevice, Error> {
        self.get_link(name, true)
    }

    fn link_set_up(&self, index: u32) -> Result<(), Error> {
        self.set_link_flags(index, true)
    }

    fn link_set_down(&self, index: u32) -> Result<(), Error> {
        self.set_link_flags(index, false)
    }

    fn link_set_name(&self, index: u32, name: &str) -> Result<(), Error> {
        let mut msg = LinkMessage::default();
        msg.header.index = index;
        msg.nlas.push(link::Nla::IfName(name.to_string()));
        self.set_link(msg)
    }

    fn link_set_hardware_addr(&self, index: u32, addr: &[u8]) -> Result<(), Error> {
        let mut msg = LinkMessage::default();
        msg.header.index = index;
        msg.nlas.push(link::Nla::Address(addr.to_vec()));
        self.set_link(msg)
    }

    fn link_set_ns_fd(&self, index: u32, fd: RawFd) -> Result<(), Error> {
        let mut msg = LinkMessage::default();
        msg.header.index = index;
        msg.nlas.push(link::Nla::NetNsFd(fd));
        self.set_link(msg)
    }

    fn link_set_vf_mac(&self, pf_index: u32, vf: u32, mac: &[u8; 6]) -> Result<(), Error> {
        self.set_vf_attr(pf_index, IFLA_VF_MAC, encode_vf_mac(vf, mac))
    }

    fn link_set_vf_vlan(
        &self,
        pf_index: u32,
        vf: u32,
        vlan: u32,
        qos: u32,
        proto: u16,
    ) -> Result<(), Error> {
        // Proto-aware VLAN programming goes through the VLAN_LIST form.
        let info = encode_nla(IFLA_VF_VLAN_INFO, &encode_vf_vlan_info(vf, vlan, qos, proto));
        self.set_vf_attr(pf_index, IFLA_VF_VLAN_LIST | NLA_F_NESTED, info)
    }

    fn link_set_vf_spoofchk(&self, pf_index: u32, vf: u32, on: bool) -> Result<(), Error> {
        self.set_vf_attr(pf_index, IFLA_VF_SPOOFCHK, encode_vf_setting(vf, on))
    }

    fn link_set_vf_trust(&self, pf_index: u32, vf: u32, on: bool) -> Result<(), Error> {
        self.set_vf_attr(pf_index, IFLA_VF_TRUST, encode_vf_setting(vf, on))
    }

    fn link_set_vf_link_state(&self, pf_index: u32, vf: u32, state: u32) -> Result<(), Error> {
        self.set_vf_attr(pf_index, IFLA_VF_LINK_STATE, encode_u32_pair(vf, state))
    }

    fn link_set_vf_rate(
        &self,
        pf_index: u32,
        vf: u32,
        min_tx_rate: u32,
        max_tx_rate: u32,
    ) -> Result<(), Error> {
        self.set_vf_attr(
            pf_index,
            IFLA_VF_RATE,
            encode_vf_rate(vf, min_tx_rate, max_tx_rate),
        )
    }

    fn addr_add(&self, index: u32, addr: &IpNetwork) -> Result<(), Error> {
        let mut msg = AddressMessage::default();
        msg.header.index = index;
        msg.header.prefix_len = addr.prefix();
        match addr {
            IpNetwork::V4(net) => {
                msg.header.family = AF_INET as u8;
                let octets = net.ip().octets().to_vec();
                msg.nlas.push(address::Nla::Address(octets.clone()));
                // For IPv4 the local address is mandatory; the broadcast
                // address keeps tools that expect it happy.
                msg.nlas.push(address::Nla::Local(octets));
                if net.prefix() < 31 {
                    msg.nlas
                        .push(address::Nla::Broadcast(net.broadcast().octets().to_vec()));
                }
            }
            IpNetwork::V6(net) => {
                msg.header.family = AF_INET6 as u8;
                msg.nlas
                    .push(address::Nla::Address(net.ip().octets().to_vec()));
            }
        }
        self.request(
            RtnlMessage::NewAddress(msg),
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        )
        .map(|_| ())
    }

    fn route_add(&self, index: u32, dst: &IpNetwork, gw: Option<IpAddr>) -> Result<(), Error> {
        let mut msg = RouteMessage::default();
        msg.header.table = RT_TABLE_MAIN;
        msg.header.protocol = RTPROT_STATIC;
        msg.header.kind = RTN_UNICAST;
        msg.header.scope = if gw.is_some() {
            RT_SCOPE_UNIVERSE
        } else {
            RT_SCOPE_LINK
        };
        msg.header.destination_prefix_length = dst.prefix();
        msg.header.address_family = match dst {
            IpNetwork::V4(_) => AF_INET as u8,
            IpNetwork::V6(_) => AF_INET6 as u8,
        };
        msg.nlas.push(route::Nla::Destination(ip_octets(dst.ip())));
        if let Some(gw) = gw {
            msg.nlas.push(route::Nla::Gateway(ip_octets(gw)));
        }
        msg.nlas.push(route::Nla::Oif(index));
        self.request(
            RtnlMessage::NewRoute(msg),
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        )
        .map(|_| ())
    }
}

fn ip_octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn link_device_from_message(mut msg: LinkMessage) -> LinkDevice {
    let mut device = LinkDevice {
        index: msg.header.index,
        ..Default::default()
    };
    while let Some(nla) = msg.nlas.pop() {
        match nla {
            link::Nla::IfName(name) => device.name = name,
            link::Nla::Address(addr) => device.hw_addr = Some(addr),
            link::Nla::VfInfoList(bytes) => device.vfs = parse_vf_info_list(&bytes),
            _ => {}
        }
    }
    device
}

// Attribute encoding: a 4-byte header (length, kind) followed by the
// payload, padded to a 4-byte boundary.
fn encode_nla(kind: u16, payload: &[u8]) -> Vec<u8> {
    let len = 4 + payload.len();
    let mut buf = Vec::with_capacity((len + 3) & !3);
    buf.extend_from_slice(&(len as u16).to_ne_bytes());
    buf.extend_from_slice(&kind.to_ne_bytes());
    buf.extend_from_slice(payload);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    buf
}

// struct ifla_vf_mac { u32 vf; u8 mac[32]; }
fn encode_vf_mac(vf: u32, mac: &[u8; 6]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(36);
    buf.extend_from_slice(&vf.to_ne_bytes());
    buf.extend_from_slice(mac);
    buf.resize(36, 0);
    buf
}

// struct ifla_vf_vlan_info { u32 vf; u32 vlan; u32 qos; be16 vlan_proto; }
fn encode_vf_vlan_info(vf: u32, vlan: u32, qos: u32, proto: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(14);
    buf.extend_from_slice(&vf.to_ne_bytes());
    buf.extend_from_slice(&vlan.to_ne_bytes());
    buf.extend_from_slice(&qos.to_ne_bytes());
    buf.extend_from_slice(&proto.to_be_bytes());
    buf
}

// struct ifla_vf_spoofchk / ifla_vf_trust { u32 vf; u32 setting; }
fn encode_vf_setting(vf: u32, on: bool) -> Vec<u8> {
    encode_u32_pair(vf, u32::from(on))
}

fn encode_u32_pair(a: u32, b: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&a.to_ne_bytes());
    buf.extend_from_slice(&b.to_ne_bytes());
    buf
}

// struct ifla_vf_rate { u32 vf; u32 min_tx_rate; u32 max_tx_rate; }
fn encode_vf_rate(vf: u32, min_tx_rate: u32, max_tx_rate: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&vf.to_ne_bytes());
    buf.extend_from_slice(&min_tx_rate.to_ne_bytes());
    buf.extend_from_slice(&max_tx_rate.to_ne_bytes());
    buf
}

struct NlaIter<'a> {
    buf: &'a [u8],
}

impl<'a> Iterator for NlaIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < 4 {
            return None;
        }
        let len = u16::from_ne_bytes([self.buf[0], self.buf[1]]) as usize;
        let kind = u16::from_ne_bytes([self.buf[2], self.buf[3]]);
        if len < 4 || len > self.buf.len() {
            return None;
        }
        let payload = &self.buf[4..len];
        let aligned = (len + 3) & !3;
        self.buf = if aligned >= self.buf.len() {
            &[]
        } else {
            &self.buf[aligned..]
        };
        Some((kind & NLA_TYPE_MASK, payload))
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

/// Parses the payload of `IFLA_VFINFO_LIST`: one nested `IFLA_VF_INFO` per
/// VF, each containing one attribute per kernel `ifla_vf_*` struct.
pub fn parse_vf_info_list(bytes: &[u8]) -> Vec<VfInfo> {
    let mut vfs = Vec::new();
    for (kind, payload) in (NlaIter { buf: bytes }) {
        if kind != IFLA_VF_INFO {
            continue;
        }
        let mut vf = VfInfo {
            vlan_proto: 0x8100,
            ..Default::default()
        };
        for (attr, value) in (NlaIter { buf: payload }) {
            match attr {
                IFLA_VF_MAC if value.len() >= 10 => {
                    vf.id = read_u32(value, 0);
                    vf.mac.copy_from_slice(&value[4..10]);
                }
                IFLA_VF_VLAN if value.len() >= 12 => {
                    vf.vlan = read_u32(value, 4);
                    vf.qos = read_u32(value, 8);
                }
                IFLA_VF_VLAN_LIST => {
                    for (inner, info) in (NlaIter { buf: value }) {
                        if inner == IFLA_VF_VLAN_INFO && info.len() >= 14 {
                            vf.vlan = read_u32(info, 4);
                            vf.qos = read_u32(info, 8);
                            vf.vlan_proto = u16::from_be_bytes([info[12], info[13]]);
                        }
                    }
                }
                IFLA_VF_SPOOFCHK if value.len() >= 8 => {
                    // The kernel reports u32::MAX when the driver does not
                    // implement the toggle.
                    let setting = read_u32(value, 4);
                    vf.spoofchk = setting != 0 && setting != u32::MAX;
                }
                IFLA_VF_TRUST if value.len() >= 8 => {
                    let setting = read_u32(value, 4);
                    vf.trust = setting != 0 && setting != u32::MAX;
                }
                IFLA_VF_LINK_STATE if value.len() >= 8 => {
                    vf.link_state = read_u32(value, 4);
                }
                IFLA_VF_RATE if value.len() >= 12 => {
                    vf.min_tx_rate = read_u32(value, 4);
                    vf.max_tx_rate = read_u32(value, 8);
                }
                _ => {}
            }
        }
        vfs.push(vf);
    }
    vfs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_nla_pads_to_alignment() {
        let nla = encode_nla(IFLA_VF_VLAN_INFO, &encode_vf_vlan_info(1, 100, 3, 0x8100));
        // 4 bytes header + 14 bytes struct, padded to 20.
        assert_eq!(nla.len(), 20);
        assert_eq!(u16::from_ne_bytes([nla[0], nla[1]]), 18);
        assert_eq!(u16::from_ne_bytes([nla[2], nla[3]]), IFLA_VF_VLAN_INFO);
        assert_eq!(&nla[18..], &[0, 0]);
    }

    #[test]
    fn encode_vf_mac_layout() {
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        let buf = encode_vf_mac(3, &mac);
        assert_eq!(buf.len(), 36);
        assert_eq!(read_u32(&buf, 0), 3);
        assert_eq!(&buf[4..10], &mac);
        assert!(buf[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn encode_vf_vlan_info_proto_is_big_endian() {
        let buf = encode_vf_vlan_info(1, 100, 3, 0x88a8);
        assert_eq!(read_u32(&buf, 0), 1);
        assert_eq!(read_u32(&buf, 4), 100);
        assert_eq!(read_u32(&buf, 8), 3);
        assert_eq!(&buf[12..14], &[0x88, 0xa8]);
    }

    #[test]
    fn parse_round_trips_encoded_attributes() {
        // Build an IFLA_VFINFO_LIST payload the way the kernel dumps it.
        let mac = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let mut inner = Vec::new();
        inner.extend(encode_nla(IFLA_VF_MAC, &encode_vf_mac(1, &mac)));
        inner.extend(encode_nla(
            IFLA_VF_VLAN_LIST | NLA_F_NESTED,
            &encode_nla(
                IFLA_VF_VLAN_INFO,
                &encode_vf_vlan_info(1, 100, 3, 0x88a8),
            ),
        ));
        inner.extend(encode_nla(IFLA_VF_SPOOFCHK, &encode_vf_setting(1, true)));
        inner.extend(encode_nla(IFLA_VF_TRUST, &encode_vf_setting(1, false)));
        inner.extend(encode_nla(IFLA_VF_LINK_STATE, &encode_u32_pair(1, 2)));
        inner.extend(encode_nla(IFLA_VF_RATE, &encode_vf_rate(1, 10, 20)));
        let list = encode_nla(IFLA_VF_INFO | NLA_F_NESTED, &inner);

        let vfs = parse_vf_info_list(&list);
        assert_eq!(vfs.len(), 1);
        let vf = &vfs[0];
        assert_eq!(vf.id, 1);
        assert_eq!(vf.mac, mac);
        assert_eq!(vf.vlan, 100);
        assert_eq!(vf.qos, 3);
        assert_eq!(vf.vlan_proto, 0x88a8);
        assert!(vf.spoofchk);
        assert!(!vf.trust);
        assert_eq!(vf.link_state, 2);
        assert_eq!(vf.min_tx_rate, 10);
        assert_eq!(vf.max_tx_rate, 20);
    }

    #[test]
    fn parse_multiple_vf_entries() {
        let mut list = Vec::new();
        for id in 0..3u32 {
            let mut inner = Vec::new();
            inner.extend(encode_nla(IFLA_VF_MAC, &encode_vf_mac(id, &[0; 6])));
            inner.extend(encode_nla(IFLA_VF_SPOOFCHK, &encode_vf_setting(id, true)));
            list.extend(encode_nla(IFLA_VF_INFO | NLA_F_NESTED, &inner));
        }

        let vfs = parse_vf_info_list(&list);
        assert_eq!(vfs.len(), 3);
        assert_eq!(vfs[2].id, 2);
    }

    #[test]
    fn parse_unimplemented_spoofchk_reads_as_off() {
        let mut inner = Vec::new();
        inner.extend(encode_nla(IFLA_VF_MAC, &encode_vf_mac(0, &[0; 6])));
        inner.extend(encode_nla(
            IFLA_VF_SPOOFCHK,
            &encode_u32_pair(0, u32::MAX),
        ));
        let list = encode_nla(IFLA_VF_INFO | NLA_F_NESTED, &inner);

        let vfs = parse_vf_info_list(&list);
        assert!(!vfs[0].spoofchk);
    }

    #[test]
    fn parse_tolerates_truncated_input() {
        assert!(parse_vf_info_list(&[]).is_empty());
        assert!(parse_vf_info_list(&[1, 0]).is_empty());
        // A header claiming more payload than present is dropped.
        assert!(parse_vf_info_list(&[40, 0, 1, 0, 0, 0]).is_empty());
    }
}
