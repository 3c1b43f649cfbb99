//! A network interface translating between IPv4 datagrams and Ethernet
//! frames, resolving next-hop link-layer addresses with ARP, a cache, and a
//! per-destination pending-datagram queue.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use tracing::debug;

use crate::config::{ARP_CACHE_TTL_MS, ARP_REQUEST_COOLDOWN_MS};

use super::arp::{self, ArpMessage};
use super::ethernet::{self, EthernetAddress, EthernetFrame, EtherType};
use super::ipv4::Ipv4Datagram;

fn ip_key(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

#[derive(Debug)]
pub struct NetworkInterface {
    ethernet_address: EthernetAddress,
    ip_address: Ipv4Addr,
    frames_out: VecDeque<EthernetFrame>,
    /// sender IP -> (sender MAC, remaining cache TTL in ms)
    arp_cache: HashMap<u32, (EthernetAddress, u64)>,
    /// destination IP -> (queued datagrams, ms since the last ARP request)
    pending: HashMap<u32, (VecDeque<Ipv4Datagram>, u64)>,
}

impl NetworkInterface {
    pub fn new(ethernet_address: EthernetAddress, ip_address: Ipv4Addr) -> Self {
        debug!(
            ethernet_address = %ethernet_address,
            ip_address = %ip_address,
            "network interface constructed"
        );
        NetworkInterface {
            ethernet_address,
            ip_address,
            frames_out: VecDeque::new(),
            arp_cache: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip_address
    }

    pub fn frames_out(&mut self) -> &mut VecDeque<EthernetFrame> {
        &mut self.frames_out
    }

    fn create_frame(&self, payload: Vec<u8>, dst: EthernetAddress, ethertype: EtherType) -> EthernetFrame {
        EthernetFrame {
            dst,
            src: self.ethernet_address,
            ethertype,
            payload,
        }
    }

    fn send_arp_message(&mut self, target_ip: u32, opcode: u16, target_mac: EthernetAddress, frame_dst: EthernetAddress) {
        let msg = ArpMessage {
            opcode,
            sender_ethernet_address: self.ethernet_address,
            sender_ip_address: self.ip_address,
            target_ethernet_address: target_mac,
            target_ip_address: Ipv4Addr::from(target_ip.to_be_bytes()),
        };
        let frame = self.create_frame(msg.to_bytes(), frame_dst, EtherType::Arp);
        self.frames_out.push_back(frame);
    }

    /// Sends `dgram` to `next_hop`, resolving its Ethernet address via ARP
    /// (with caching and a 5-second per-IP request cooldown) if unknown.
    pub fn send_datagram(&mut self, dgram: Ipv4Datagram, next_hop: Ipv4Addr) {
        let key = ip_key(next_hop);

        if let Some((mac, _)) = self.arp_cache.get(&key) {
            let frame = self.create_frame(dgram.to_bytes(), *mac, EtherType::Ipv4);
            self.frames_out.push_back(frame);
            return;
        }

        let entry = self
            .pending
            .entry(key)
            .or_insert_with(|| (VecDeque::new(), ARP_REQUEST_COOLDOWN_MS as u64));

        if entry.1 >= ARP_REQUEST_COOLDOWN_MS as u64 {
            entry.1 = 0;
            self.send_arp_message(key, arp::OP_REQUEST, EthernetAddress([0; 6]), ethernet::BROADCAST);
        }

        self.pending.get_mut(&key).unwrap().0.push_back(dgram);
    }

    fn drain_pending(&mut self, key: u32, mac: EthernetAddress) {
        if let Some((queue, _)) = self.pending.remove(&key) {
            for dgram in queue {
                let frame = self.create_frame(dgram.to_bytes(), mac, EtherType::Ipv4);
                self.frames_out.push_back(frame);
            }
        }
    }

    /// Returns the enclosed datagram if `frame` carries IPv4 addressed to
    /// this interface; otherwise learns/replies to ARP and returns `None`.
    pub fn recv_frame(&mut self, frame: &EthernetFrame) -> Option<Ipv4Datagram> {
        if frame.dst != self.ethernet_address && !frame.dst.is_broadcast() {
            return None;
        }

        match frame.ethertype {
            EtherType::Ipv4 => Ipv4Datagram::from_bytes(&frame.payload),
            EtherType::Arp => {
                let msg = ArpMessage::from_bytes(&frame.payload)?;
                let sender_key = ip_key(msg.sender_ip_address);
                self.arp_cache.insert(
                    sender_key,
                    (msg.sender_ethernet_address, ARP_CACHE_TTL_MS as u64),
                );
                self.drain_pending(sender_key, msg.sender_ethernet_address);

                if msg.opcode == arp::OP_REQUEST && msg.target_ip_address == self.ip_address {
                    self.send_arp_message(
                        sender_key,
                        arp::OP_REPLY,
                        msg.sender_ethernet_address,
                        msg.sender_ethernet_address,
                    );
                }
                None
            }
        }
    }

    /// Ages cache entries toward eviction and accumulates per-IP cooldowns,
    /// capped at the request cooldown so a later `send_datagram` re-arms.
    pub fn tick(&mut self, ms_since_last_tick: u64) {
        self.arp_cache.retain(|_, (_, ttl)| {
            if *ttl <= ms_since_last_tick {
                false
            } else {
                *ttl -= ms_since_last_tick;
                true
            }
        });

        for (_, since_request) in self.pending.values_mut() {
            if *since_request < ARP_REQUEST_COOLDOWN_MS as u64 {
                *since_request = (*since_request + ms_since_last_tick).min(ARP_REQUEST_COOLDOWN_MS as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::IpNumber;

    fn iface(ip: Ipv4Addr) -> NetworkInterface {
        NetworkInterface::new(EthernetAddress([1, 1, 1, 1, 1, 1]), ip)
    }

    #[test]
    fn s6_arp_resolution_and_caching() {
        let us = Ipv4Addr::new(10, 0, 0, 1);
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        let peer_mac = EthernetAddress([2, 2, 2, 2, 2, 2]);
        let mut nic = iface(us);

        let dgram = Ipv4Datagram::new(us, peer, 64, IpNumber::TCP, vec![1, 2, 3]);
        nic.send_datagram(dgram, peer);

        let req_frame = nic.frames_out().pop_front().unwrap();
        assert!(req_frame.dst.is_broadcast());
        assert_eq!(req_frame.ethertype, EtherType::Arp);
        assert!(nic.frames_out().is_empty());

        let reply = ArpMessage {
            opcode: arp::OP_REPLY,
            sender_ethernet_address: peer_mac,
            sender_ip_address: peer,
            target_ethernet_address: nic.ethernet_address,
            target_ip_address: us,
        };
        let reply_frame = EthernetFrame {
            dst: nic.ethernet_address,
            src: peer_mac,
            ethertype: EtherType::Arp,
            payload: reply.to_bytes(),
        };
        assert!(nic.recv_frame(&reply_frame).is_none());

        let sent = nic.frames_out().pop_front().unwrap();
        assert_eq!(sent.dst, peer_mac);
        assert_eq!(sent.ethertype, EtherType::Ipv4);

        nic.tick(30_000);
        assert!(nic.arp_cache.contains_key(&ip_key(peer)));
        nic.tick(1);
        assert!(!nic.arp_cache.contains_key(&ip_key(peer)));
    }

    #[test]
    fn arp_request_not_resent_within_cooldown() {
        let us = Ipv4Addr::new(10, 0, 0, 1);
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        let mut nic = iface(us);

        nic.send_datagram(Ipv4Datagram::new(us, peer, 64, IpNumber::TCP, vec![]), peer);
        nic.frames_out().clear();

        nic.send_datagram(Ipv4Datagram::new(us, peer, 64, IpNumber::TCP, vec![]), peer);
        assert!(nic.frames_out().is_empty());

        nic.tick(ARP_REQUEST_COOLDOWN_MS as u64);
        nic.send_datagram(Ipv4Datagram::new(us, peer, 64, IpNumber::TCP, vec![]), peer);
        assert_eq!(nic.frames_out().len(), 1);
    }

    #[test]
    fn arp_request_replies_only_when_targeting_us() {
        let us = Ipv4Addr::new(10, 0, 0, 1);
        let asker = Ipv4Addr::new(10, 0, 0, 9);
        let asker_mac = EthernetAddress([3; 6]);
        let mut nic = iface(us);

        let req = ArpMessage {
            opcode: arp::OP_REQUEST,
            sender_ethernet_address: asker_mac,
            sender_ip_address: asker,
            target_ethernet_address: EthernetAddress([0; 6]),
            target_ip_address: us,
        };
        let frame = EthernetFrame {
            dst: ethernet::BROADCAST,
            src: asker_mac,
            ethertype: EtherType::Arp,
            payload: req.to_bytes(),
        };
        assert!(nic.recv_frame(&frame).is_none());

        let reply = nic.frames_out().pop_front().unwrap();
        assert_eq!(reply.dst, asker_mac);
        let parsed = ArpMessage::from_bytes(&reply.payload).unwrap();
        assert_eq!(parsed.opcode, arp::OP_REPLY);
    }

    #[test]
    fn frames_for_other_destinations_are_dropped() {
        let mut nic = iface(Ipv4Addr::new(10, 0, 0, 1));
        let frame = EthernetFrame {
            dst: EthernetAddress([9; 6]),
            src: EthernetAddress([8; 6]),
            ethertype: EtherType::Ipv4,
            payload: vec![],
        };
        assert!(nic.recv_frame(&frame).is_none());
        assert!(nic.frames_out().is_empty());
    }
}
