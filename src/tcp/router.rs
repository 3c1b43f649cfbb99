//! Longest-prefix-match IPv4 forwarding across a set of owned network
//! interfaces.

use std::net::Ipv4Addr;

use tracing::{debug, trace};

use super::ipv4::Ipv4Datagram;
use super::network::NetworkInterface;

fn ip_key(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

/// Masks `addr` to its `prefix_length` high-order bits.
fn mask_to(prefix_length: u8, addr: u32) -> u32 {
    if prefix_length == 0 {
        0
    } else if prefix_length >= 32 {
        addr
    } else {
        (addr >> (32 - prefix_length)) << (32 - prefix_length)
    }
}

#[derive(Debug, Clone)]
struct Route {
    prefix: u32,
    prefix_length: u8,
    next_hop: Option<Ipv4Addr>,
    interface_index: usize,
}

#[derive(Debug, Default)]
pub struct Router {
    interfaces: Vec<NetworkInterface>,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn add_interface(&mut self, interface: NetworkInterface) -> usize {
        self.interfaces.push(interface);
        self.interfaces.len() - 1
    }

    pub fn interface_mut(&mut self, index: usize) -> &mut NetworkInterface {
        &mut self.interfaces[index]
    }

    pub fn interfaces_mut(&mut self) -> impl Iterator<Item = &mut NetworkInterface> {
        self.interfaces.iter_mut()
    }

    /// Stores the route after masking `route_prefix` to its high-order
    /// `prefix_length` bits. `prefix_length == 0` matches any address.
    pub fn add_route(
        &mut self,
        route_prefix: Ipv4Addr,
        prefix_length: u8,
        next_hop: Option<Ipv4Addr>,
        interface_index: usize,
    ) {
        debug!(
            prefix = %route_prefix,
            prefix_length,
            next_hop = ?next_hop,
            interface_index,
            "adding route"
        );
        self.routes.push(Route {
            prefix: mask_to(prefix_length, ip_key(route_prefix)),
            prefix_length,
            next_hop,
            interface_index,
        });
    }

    /// Forwards `dgram` out the interface of the most specific matching
    /// route, decrementing TTL. Drops the datagram if its TTL has expired
    /// or no route matches.
    pub fn route_one_datagram(&mut self, mut dgram: Ipv4Datagram) {
        if dgram.ttl() <= 1 {
            trace!(dst = %dgram.dst(), "dropping datagram: ttl expired");
            return;
        }

        let dst_key = ip_key(dgram.dst());
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if mask_to(route.prefix_length, dst_key) == route.prefix {
                let is_better = match best {
                    None => true,
                    Some(b) => route.prefix_length > b.prefix_length,
                };
                if is_better {
                    best = Some(route);
                }
            }
        }

        let Some(route) = best else {
            trace!(dst = %dgram.dst(), "dropping datagram: no matching route");
            return;
        };

        dgram.decrement_ttl();
        let next_hop = route.next_hop.unwrap_or_else(|| dgram.dst());
        let interface_index = route.interface_index;
        self.interfaces[interface_index].send_datagram(dgram, next_hop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::ethernet::EthernetAddress;
    use etherparse::IpNumber;

    fn iface(ip: Ipv4Addr) -> NetworkInterface {
        NetworkInterface::new(EthernetAddress([0xaa; 6]), ip)
    }

    #[test]
    fn s7_router_longest_prefix_match() {
        let mut router = Router::new();
        let default_if = router.add_interface(iface(Ipv4Addr::new(192, 168, 0, 1)));
        let specific_if = router.add_interface(iface(Ipv4Addr::new(10, 1, 0, 1)));

        router.add_route(Ipv4Addr::new(0, 0, 0, 0), 0, None, default_if);
        router.add_route(
            Ipv4Addr::new(10, 1, 0, 0),
            16,
            Some(Ipv4Addr::new(10, 1, 0, 254)),
            specific_if,
        );

        let to_specific = Ipv4Datagram::new(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(10, 1, 2, 3),
            64,
            IpNumber::TCP,
            vec![],
        );
        router.route_one_datagram(to_specific);
        assert_eq!(router.interface_mut(specific_if).frames_out().len(), 1);
        assert!(router.interface_mut(default_if).frames_out().is_empty());

        let to_default = Ipv4Datagram::new(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            64,
            IpNumber::TCP,
            vec![],
        );
        router.route_one_datagram(to_default);
        assert_eq!(router.interface_mut(default_if).frames_out().len(), 1);
    }

    #[test]
    fn ttl_of_one_is_dropped() {
        let mut router = Router::new();
        let idx = router.add_interface(iface(Ipv4Addr::new(10, 0, 0, 1)));
        router.add_route(Ipv4Addr::new(0, 0, 0, 0), 0, None, idx);

        let dgram = Ipv4Datagram::new(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(10, 0, 0, 5),
            1,
            IpNumber::TCP,
            vec![],
        );
        router.route_one_datagram(dgram);
        assert!(router.interface_mut(idx).frames_out().is_empty());
    }

    #[test]
    fn unroutable_datagram_is_dropped() {
        let mut router = Router::new();
        let idx = router.add_interface(iface(Ipv4Addr::new(10, 0, 0, 1)));
        router.add_route(Ipv4Addr::new(192, 168, 0, 0), 16, None, idx);

        let dgram = Ipv4Datagram::new(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            64,
            IpNumber::TCP,
            vec![],
        );
        router.route_one_datagram(dgram);
        assert!(router.interface_mut(idx).frames_out().is_empty());
    }
}
