//! ARP message framing (RFC 826), transcribed field-for-field from the
//! external-interfaces table: htype/ptype/hlen/plen fixed to Ethernet/IPv4,
//! an opcode, and sender/target (Ethernet, IPv4) pairs.

use std::net::Ipv4Addr;

use super::ethernet::EthernetAddress;

pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpMessage {
    pub opcode: u16,
    pub sender_ethernet_address: EthernetAddress,
    pub sender_ip_address: Ipv4Addr,
    pub target_ethernet_address: EthernetAddress,
    pub target_ip_address: Ipv4Addr,
}

impl ArpMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        out.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        out.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
        out.push(6); // hlen
        out.push(4); // plen
        out.extend_from_slice(&self.opcode.to_be_bytes());
        out.extend_from_slice(&self.sender_ethernet_address.0);
        out.extend_from_slice(&self.sender_ip_address.octets());
        out.extend_from_slice(&self.target_ethernet_address.0);
        out.extend_from_slice(&self.target_ip_address.octets());
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 28 {
            return None;
        }
        let htype = u16::from_be_bytes([raw[0], raw[1]]);
        let ptype = u16::from_be_bytes([raw[2], raw[3]]);
        let hlen = raw[4];
        let plen = raw[5];
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != 6 || plen != 4 {
            return None;
        }
        let opcode = u16::from_be_bytes([raw[6], raw[7]]);
        let sender_ethernet_address = EthernetAddress(raw[8..14].try_into().unwrap());
        let sender_ip_address = Ipv4Addr::new(raw[14], raw[15], raw[16], raw[17]);
        let target_ethernet_address = EthernetAddress(raw[18..24].try_into().unwrap());
        let target_ip_address = Ipv4Addr::new(raw[24], raw[25], raw[26], raw[27]);
        Some(ArpMessage {
            opcode,
            sender_ethernet_address,
            sender_ip_address,
            target_ethernet_address,
            target_ip_address,
        })
    }
}
