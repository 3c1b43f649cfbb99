//! A thin, owned wrapper around `etherparse`'s IPv4 header that the router
//! can mutate (TTL) and the network interface can serialize/parse, matching
//! "assumed provided by a framing library" in the external-interfaces design.

use std::net::Ipv4Addr;

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice};

#[derive(Debug, Clone)]
pub struct Ipv4Datagram {
    header: Ipv4Header,
    payload: Vec<u8>,
}

impl Ipv4Datagram {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, protocol: IpNumber, payload: Vec<u8>) -> Self {
        let header = Ipv4Header::new(payload.len() as u16, ttl, protocol, src.octets(), dst.octets())
            .expect("payload length fits in an IPv4 datagram");
        Ipv4Datagram { header, payload }
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.header.source)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.header.destination)
    }

    pub fn ttl(&self) -> u8 {
        self.header.time_to_live
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.header.time_to_live = ttl;
    }

    pub fn decrement_ttl(&mut self) {
        self.header.time_to_live -= 1;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.header_len() + self.payload.len());
        self.header
            .write(&mut out)
            .expect("writing to a Vec cannot fail");
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let slice = Ipv4HeaderSlice::from_slice(raw).ok()?;
        let header_len = slice.slice().len();
        let header = slice.to_header();
        let payload = raw.get(header_len..)?.to_vec();
        Some(Ipv4Datagram { header, payload })
    }
}
