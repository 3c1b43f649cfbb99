//! Ethernet framing: the wire format the network interface (§4.6) sends and
//! receives. `etherparse` has no ARP support in the pinned version, so this
//! and `arp` are small hand-rolled structs transcribing the field list in
//! the external-interfaces table rather than an invented wire format.

use std::fmt;

pub const BROADCAST: EthernetAddress = EthernetAddress([0xff; 6]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST
    }
}

impl fmt::Display for EthernetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Arp,
}

impl EtherType {
    fn as_u16(self) -> u16 {
        match self {
            EtherType::Ipv4 => 0x0800,
            EtherType::Arp => 0x0806,
        }
    }

    fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x0800 => Some(EtherType::Ipv4),
            0x0806 => Some(EtherType::Arp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EthernetFrame {
    pub dst: EthernetAddress,
    pub src: EthernetAddress,
    pub ethertype: EtherType,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14 + self.payload.len());
        out.extend_from_slice(&self.dst.0);
        out.extend_from_slice(&self.src.0);
        out.extend_from_slice(&self.ethertype.as_u16().to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 14 {
            return None;
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&raw[0..6]);
        src.copy_from_slice(&raw[6..12]);
        let ethertype = EtherType::from_u16(u16::from_be_bytes([raw[12], raw[13]]))?;
        Some(EthernetFrame {
            dst: EthernetAddress(dst),
            src: EthernetAddress(src),
            ethertype,
            payload: raw[14..].to_vec(),
        })
    }
}
