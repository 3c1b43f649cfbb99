//! The socket-style front door: a thin `Interface`/`TcpListener`/`TcpStream`
//! trio. The demuxer (`InterfaceManager`/`ConnectionManager`, mutex + condvar,
//! one reader thread) demuxes onto a real [`TcpConnection`] per 4-tuple, with
//! segment (de)serialization bridged through `etherparse`.
//!
//! The hard core (byte stream, reassembler, sender, receiver, connection FSM,
//! ARP-capable interface, router) lives under [`tcp`] and has no dependency
//! on this module; this is embedder-facing glue layered on top of it.

use std::time::Instant;
use std::{
    collections::{hash_map, HashMap, VecDeque},
    io,
    sync::{Arc, Condvar, Mutex},
    thread,
};

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeaderSlice};
use tracing::{debug, trace, warn};

mod config;
mod error;
mod tcp;

pub use config::StackConfig;
pub use error::{Result, StackError};

use tcp::{connection::TcpConnection, segment::TcpSegment, state::Available, Tcp4Tuple};

const BUFFER_SIZE: usize = 1504;
const SEND_QUEUE_SIZE: usize = 1024;
const DEFAULT_TTL: u8 = 64;

/// Type for handling interface requests
type InterfaceHandle = Arc<InterfaceManager>;

#[derive(Default)]
struct InterfaceManager {
    manager: Mutex<ConnectionManager>,
    pending_var: Condvar,
    receive_var: Condvar,
}

/// struct for managing connections.
struct ConnectionManager {
    // Array to store port for which connections are accepted
    pending: HashMap<u16, VecDeque<Tcp4Tuple>>,
    // Accepted connections
    connections: HashMap<Tcp4Tuple, TcpConnection>,
    // flag to terminate
    terminate: bool,
    config: StackConfig,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        ConnectionManager {
            pending: HashMap::new(),
            connections: HashMap::new(),
            terminate: false,
            config: StackConfig::default(),
        }
    }
}

/// Struct that acts as an interface to the tcp implementation
/// Essentially, it interfaces to the thread that manages tcp connections
/// and an interface handle (to connection manager) that keeps track of
/// the connections
pub struct Interface {
    ih: Option<InterfaceHandle>,
    jh: Option<thread::JoinHandle<io::Result<()>>>,
}

/// Builds the wire bytes (IPv4 header + TCP segment) for a reply to `quad`
/// and writes them to the tun device. `quad.dst` is our own address; the
/// reply is addressed back to `quad.src`.
fn send_segment(nic: &tun_tap::Iface, quad: &Tcp4Tuple, seg: &TcpSegment) -> io::Result<()> {
    const TCP_HEADER_LEN: u16 = 20;
    let ip_header = Ipv4Header::new(
        TCP_HEADER_LEN + seg.payload.len() as u16,
        DEFAULT_TTL,
        IpNumber::TCP,
        quad.dst.0.octets(),
        quad.src.0.octets(),
    )
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let mut out = Vec::with_capacity(ip_header.header_len() + TCP_HEADER_LEN as usize + seg.payload.len());
    ip_header
        .write(&mut out)
        .expect("writing to a Vec cannot fail");
    out.extend_from_slice(&seg.to_bytes(&ip_header, quad.dst.1, quad.src.1));

    nic.send(&out)?;
    Ok(())
}

/// Drains `conn`'s outbound queue onto the wire, logging (never failing) on
/// a write error so one bad quad doesn't take down the reader thread.
fn drain_outbound(nic: &tun_tap::Iface, quad: &Tcp4Tuple, conn: &mut TcpConnection) {
    while let Some(seg) = conn.segments_out().pop_front() {
        if let Err(e) = send_segment(nic, quad, &seg) {
            warn!(?quad, error = %e, "failed to write segment to tun device");
        }
    }
}

/// Advances every live connection's timers by `elapsed_ms`, reaps connections
/// that are no longer active, and flushes anything the tick produced (e.g. a
/// retransmission or a RST after too many of them).
fn tick_all(nic: &tun_tap::Iface, ih: &InterfaceHandle, elapsed_ms: u64) {
    let mut cm = ih.manager.lock().unwrap();
    let mut done = Vec::new();
    for (quad, conn) in cm.connections.iter_mut() {
        conn.tick(elapsed_ms);
        drain_outbound(nic, quad, conn);
        if !conn.active() {
            done.push(quad.clone());
        }
    }
    for quad in done {
        trace!(?quad, "reaping quiesced connection");
        cm.connections.remove(&quad);
    }
}

fn handle_inbound(
    nic: &tun_tap::Iface,
    ih: &InterfaceHandle,
    ip: Ipv4HeaderSlice,
    tcp: TcpHeaderSlice,
    data: &[u8],
) {
    let quad = Tcp4Tuple {
        src: (ip.source_addr(), tcp.source_port()),
        dst: (ip.destination_addr(), tcp.destination_port()),
    };
    let seg = TcpSegment::from_header_slice(&tcp, data);

    let mut cm_guard = ih.manager.lock().unwrap();
    let cm = &mut *cm_guard;

    match cm.connections.entry(quad.clone()) {
        hash_map::Entry::Occupied(mut entry) => {
            let conn = entry.get_mut();
            conn.segment_received(&seg);
            let avail = available(conn);
            let still_active = conn.active();
            drain_outbound(nic, &quad, conn);
            if !still_active {
                entry.remove();
            }
            drop(cm_guard);
            if avail.contains(Available::READ) {
                ih.receive_var.notify_all();
            }
        }
        hash_map::Entry::Vacant(e) => {
            if !seg.syn() {
                return;
            }
            let Some(pending) = cm.pending.get_mut(&quad.dst.1) else {
                return; // no listener on this port
            };
            let mut conn = TcpConnection::new(&cm.config);
            conn.accept(&seg);
            drain_outbound(nic, &quad, &mut conn);
            e.insert(conn);
            pending.push_back(quad);
            drop(cm_guard);
            ih.pending_var.notify_all();
        }
    }
}

fn available(conn: &TcpConnection) -> Available {
    let mut avail = Available::empty();
    if conn.inbound_readable() {
        avail |= Available::READ;
    }
    if conn.remaining_outbound_capacity() > 0 {
        avail |= Available::WRITE;
    }
    avail
}

/// Drives the whole stack from one thread: blocks on the tun device, and on
/// every wakeup both processes the inbound packet (if any) and advances
/// every connection's timers by the elapsed wall-clock time. Scheduling a
/// tighter tick cadence than "whenever a packet arrives" is the surrounding
/// event loop's job (out of scope here, per the design); this reader thread
/// is the embedder, and it calls `tick` once per wakeup as the contract
/// requires.
fn packet_loop(nic: tun_tap::Iface, ih: InterfaceHandle) -> io::Result<()> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut last_tick = Instant::now();

    loop {
        if ih.manager.lock().unwrap().terminate {
            return Ok(());
        }

        let nbytes = nic.recv(&mut buf[..])?;

        let elapsed = last_tick.elapsed().as_millis() as u64;
        last_tick = Instant::now();

        match Ipv4HeaderSlice::from_slice(&buf[..nbytes]) {
            Ok(ip) => {
                let proto = ip.protocol();
                let ip_len = ip.slice().len();
                if proto != IpNumber::TCP {
                    continue; // ignore non-tcp
                }
                let tcp_raw = &buf[ip_len..nbytes];
                match TcpHeaderSlice::from_slice(tcp_raw) {
                    Ok(tcp) => {
                        let tcp_len = tcp.slice().len();
                        let data_off = ip_len + tcp_len;
                        let data = &buf[data_off..nbytes];
                        handle_inbound(&nic, &ih, ip, tcp, data);
                    }
                    Err(e) => {
                        debug!(len = nbytes, error = %e, "ignoring packet: bad tcp header");
                    }
                }
            }
            Err(e) => {
                debug!(len = nbytes, error = %e, "ignoring packet: bad ip header");
            }
        }

        tick_all(&nic, &ih, elapsed);
    }
}

impl Interface {
    pub fn new(config: StackConfig) -> io::Result<Self> {
        let nic = tun_tap::Iface::without_packet_info("tun0", tun_tap::Mode::Tun)?;
        let ih: InterfaceHandle = Arc::default();
        ih.manager.lock().unwrap().config = config;

        // create a new thread and move the connection manager into the thread
        let jh = {
            let ih = ih.clone();
            Some(thread::spawn(move || packet_loop(nic, ih)))
        };

        Ok(Interface { ih: Some(ih), jh })
    }

    pub fn bind(&mut self, port: u16) -> Result<TcpListener> {
        let mut cm = self.ih.as_mut().unwrap().manager.lock().unwrap();
        match cm.pending.entry(port) {
            hash_map::Entry::Vacant(v) => {
                v.insert(VecDeque::new());
            }
            hash_map::Entry::Occupied(_o) => {
                return Err(StackError::PortInUse(port));
            }
        }
        // Start accepting SYN packets on 'port'
        drop(cm);
        Ok(TcpListener {
            ih: self.ih.as_mut().unwrap().clone(),
            port,
        })
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.ih.as_mut().unwrap().manager.lock().unwrap().terminate = true;
        drop(self.ih.take());
        self.jh
            .take()
            .expect("interface killed already")
            .join()
            .unwrap()
            .unwrap();
    }
}

pub struct TcpListener {
    ih: InterfaceHandle,
    port: u16,
}

impl TcpListener {
    pub fn accept(&mut self) -> io::Result<TcpStream> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            if let Some(quad) = cm
                .pending
                .get_mut(&self.port)
                .expect("Port closed while listener is active")
                .pop_front()
            {
                return Ok(TcpStream {
                    ih: self.ih.clone(),
                    quad,
                });
            }
            // Block for connections
            cm = self.ih.pending_var.wait(cm).unwrap();
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        let pending = cm
            .pending
            .remove(&self.port)
            .expect("Failed to remove port listener");

        for quad in pending {
            debug!(?quad, "dropping unaccepted pending connection");
        }
    }
}

pub struct TcpStream {
    ih: InterfaceHandle,
    quad: Tcp4Tuple,
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            let conn = cm
                .connections
                .get_mut(&self.quad)
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Connection closed"))?;

            if conn.inbound_eof() {
                return Ok(0);
            }

            let data = conn.read_inbound(buf.len());
            if !data.is_empty() {
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }

            cm = self.ih.receive_var.wait(cm).unwrap();
        }
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();

        let conn = cm
            .connections
            .get_mut(&self.quad)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Connection closed"))?;

        let capacity = conn.remaining_outbound_capacity().min(SEND_QUEUE_SIZE);
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "send queue is full",
            ));
        }

        let nwrite = buf.len().min(capacity);
        Ok(conn.write(&buf[..nwrite]))
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut cm = self.ih.manager.lock().unwrap();
        let conn = cm
            .connections
            .get_mut(&self.quad)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Connection closed"))?;

        if conn.bytes_in_flight() == 0 {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "unacknowledged data remains in flight",
        ))
    }
}

impl TcpStream {
    pub fn shutdown(&self, _how: std::net::Shutdown) -> io::Result<()> {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(conn) = cm.connections.get_mut(&self.quad) {
            conn.end_input_stream();
        }
        Ok(())
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        let _cm = self.ih.manager.lock().unwrap();
        // `TcpConnection::drop` sends RST itself if the connection is still
        // active; we leave the entry in the map for the reader thread to
        // reap once it quiesces, rather than removing (and dropping) it
        // here while the tun fd is owned by that other thread.
    }
}
