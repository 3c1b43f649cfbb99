//! The TCP segment header fields used by the core, plus payload, and the
//! wire-format bridge to `etherparse::TcpHeader`/`TcpHeaderSlice` (checksum
//! computation is delegated to that crate per the external-interfaces design).

use bitflags::bitflags;
use etherparse::{Ipv4Header, TcpHeader, TcpHeaderSlice};

use super::sequence::WrappingInt32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcpFlags: u8 {
        const SYN = 0b0001;
        const ACK = 0b0010;
        const FIN = 0b0100;
        const RST = 0b1000;
    }
}

#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub seqno: WrappingInt32,
    pub ackno: WrappingInt32,
    pub win: u16,
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn new(seqno: WrappingInt32) -> Self {
        TcpSegment {
            seqno,
            ackno: WrappingInt32::new(0),
            win: 0,
            flags: TcpFlags::empty(),
            payload: Vec::new(),
        }
    }

    pub fn syn(&self) -> bool {
        self.flags.contains(TcpFlags::SYN)
    }

    pub fn ack(&self) -> bool {
        self.flags.contains(TcpFlags::ACK)
    }

    pub fn fin(&self) -> bool {
        self.flags.contains(TcpFlags::FIN)
    }

    pub fn rst(&self) -> bool {
        self.flags.contains(TcpFlags::RST)
    }

    /// `SYN + |payload| + FIN`.
    pub fn length_in_sequence_space(&self) -> usize {
        self.payload.len() + self.syn() as usize + self.fin() as usize
    }

    /// Builds the on-the-wire bytes of this segment (TCP header + payload),
    /// addressed by `source_port`/`destination_port` and checksummed against
    /// `ip_header`.
    pub fn to_bytes(&self, ip_header: &Ipv4Header, source_port: u16, destination_port: u16) -> Vec<u8> {
        let mut header = TcpHeader::new(source_port, destination_port, self.seqno.raw_value(), self.win);
        header.acknowledgment_number = self.ackno.raw_value();
        header.syn = self.syn();
        header.ack = self.ack();
        header.fin = self.fin();
        header.rst = self.rst();
        header.checksum = header
            .calc_checksum_ipv4(ip_header, &self.payload)
            .expect("payload fits within an IPv4 datagram");

        let mut out = Vec::with_capacity(header.header_len() as usize + self.payload.len());
        header.write(&mut out).expect("writing to a Vec cannot fail");
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a segment from a decoded TCP header and its trailing payload.
    pub fn from_header_slice(header: &TcpHeaderSlice<'_>, payload: &[u8]) -> Self {
        let mut flags = TcpFlags::empty();
        flags.set(TcpFlags::SYN, header.syn());
        flags.set(TcpFlags::ACK, header.ack());
        flags.set(TcpFlags::FIN, header.fin());
        flags.set(TcpFlags::RST, header.rst());
        TcpSegment {
            seqno: WrappingInt32::new(header.sequence_number()),
            ackno: WrappingInt32::new(header.acknowledgment_number()),
            win: header.window_size(),
            flags,
            payload: payload.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::{IpNumber, TcpHeaderSlice};
    use std::net::Ipv4Addr;

    #[test]
    fn length_in_sequence_space_accounts_for_syn_and_fin() {
        let mut seg = TcpSegment::new(WrappingInt32::new(0));
        seg.payload = vec![1, 2, 3];
        assert_eq!(seg.length_in_sequence_space(), 3);
        seg.flags |= TcpFlags::SYN;
        assert_eq!(seg.length_in_sequence_space(), 4);
        seg.flags |= TcpFlags::FIN;
        assert_eq!(seg.length_in_sequence_space(), 5);
    }

    #[test]
    fn roundtrips_through_wire_bytes() {
        let mut seg = TcpSegment::new(WrappingInt32::new(42));
        seg.ackno = WrappingInt32::new(7);
        seg.win = 1000;
        seg.flags = TcpFlags::ACK | TcpFlags::FIN;
        seg.payload = b"hello".to_vec();

        let ip_header = Ipv4Header::new(
            0,
            64,
            IpNumber::TCP,
            Ipv4Addr::new(10, 0, 0, 1).octets(),
            Ipv4Addr::new(10, 0, 0, 2).octets(),
        )
        .unwrap();

        let bytes = seg.to_bytes(&ip_header, 1234, 80);
        let header_len = bytes.len() - seg.payload.len();
        let parsed_header = TcpHeaderSlice::from_slice(&bytes[..header_len]).unwrap();
        let back = TcpSegment::from_header_slice(&parsed_header, &bytes[header_len..]);

        assert_eq!(back.seqno, seg.seqno);
        assert_eq!(back.ackno, seg.ackno);
        assert_eq!(back.win, seg.win);
        assert!(back.ack() && back.fin() && !back.syn() && !back.rst());
        assert_eq!(back.payload, seg.payload);
    }
}
