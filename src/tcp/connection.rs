//! Orchestrates a `TcpSender` and `TcpReceiver` through the full connection
//! lifecycle: handshake, data transfer, graceful teardown with linger, and
//! reset.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::config::{StackConfig, LINGER_MULTIPLIER, MAX_RETX_ATTEMPTS};

use super::receiver::TcpReceiver;
use super::segment::{TcpFlags, TcpSegment};
use super::sender::TcpSender;
use super::state::ConnectionPhase;

#[derive(Debug)]
pub struct TcpConnection {
    sender: TcpSender,
    receiver: TcpReceiver,
    linger_after_streams_finish: bool,
    reset: bool,
    time_since_last_segment_received: u64,
    rt_timeout: u32,
    segments_out: VecDeque<TcpSegment>,
}

impl TcpConnection {
    pub fn new(cfg: &StackConfig) -> Self {
        TcpConnection {
            sender: TcpSender::new(cfg.capacity, cfg.rt_timeout, cfg.fixed_isn()),
            receiver: TcpReceiver::new(cfg.capacity),
            linger_after_streams_finish: true,
            reset: false,
            time_since_last_segment_received: 0,
            rt_timeout: cfg.rt_timeout,
            segments_out: VecDeque::new(),
        }
    }

    pub fn sender(&self) -> &TcpSender {
        &self.sender
    }

    pub fn receiver(&self) -> &TcpReceiver {
        &self.receiver
    }

    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.sender.bytes_in_flight()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.receiver.unassembled_bytes()
    }

    pub fn time_since_last_segment_received(&self) -> u64 {
        self.time_since_last_segment_received
    }

    pub fn segments_out(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }

    /// Reads up to `max_len` bytes of reassembled inbound data, draining the
    /// receiver's byte stream in FIFO order.
    pub fn read_inbound(&mut self, max_len: usize) -> Vec<u8> {
        self.receiver
            .reassembler_mut()
            .stream_out_mut()
            .read(max_len)
    }

    /// True once the inbound stream has delivered its last byte (peer's FIN
    /// fully reassembled) and every byte has been read.
    pub fn inbound_eof(&self) -> bool {
        self.receiver.reassembler().stream_out().eof()
    }

    /// True if a reader would get something other than "nothing yet": either
    /// buffered bytes are waiting, or the stream has reached EOF.
    pub fn inbound_readable(&self) -> bool {
        !self.receiver.reassembler().stream_out().buffer_empty() || self.inbound_eof()
    }

    fn inbound_active(&self) -> bool {
        !self.receiver.reassembler().stream_out().input_ended() || self.receiver.unassembled_bytes() > 0
    }

    fn outbound_active(&self) -> bool {
        !self.sender.stream_in().eof()
            || self.sender.next_seqno_absolute() != self.sender.stream_in().bytes_written() + 2
            || self.sender.bytes_in_flight() > 0
    }

    pub fn active(&self) -> bool {
        if self.reset {
            return false;
        }
        if self.inbound_active() || self.outbound_active() {
            return true;
        }
        self.linger_after_streams_finish
            && self.time_since_last_segment_received < (LINGER_MULTIPLIER * self.rt_timeout) as u64
    }

    fn stamp(&self, seg: &mut TcpSegment) {
        if let Some(ackno) = self.receiver.ackno() {
            seg.ackno = ackno;
            seg.flags |= TcpFlags::ACK;
        }
        seg.win = self.receiver.window_size();
    }

    fn drain_sender_segments(&mut self) {
        while let Some(mut seg) = self.sender.segments_out().pop_front() {
            self.stamp(&mut seg);
            self.segments_out.push_back(seg);
        }
    }

    fn safe_fill_window(&mut self) {
        self.sender.fill_window();
        self.drain_sender_segments();
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        if self.sender.next_seqno_absolute() == 0 && !seg.syn() {
            return;
        }

        trace!(phase = %self.phase(), seqno = %seg.seqno, "segment received");

        self.time_since_last_segment_received = 0;

        if seg.rst() {
            self.receiver.reassembler_mut().stream_out_mut().set_error();
            self.sender.stream_in_mut().set_error();
            self.reset = true;
            warn!("connection reset by peer");
            return;
        }

        self.receiver.segment_received(seg);

        if self.receiver.reassembler().stream_out().input_ended() && !self.sender.stream_in().eof() {
            self.linger_after_streams_finish = false;
        }

        if seg.ack() {
            self.sender.ack_received(seg.ackno, seg.win);
            let pure_zero_window_ack = seg.win == 0
                && seg.ackno.raw_value() == seg.seqno.raw_value()
                && seg.length_in_sequence_space() == 0;
            if !pure_zero_window_ack {
                // Deliberately not `safe_fill_window`: draining happens once,
                // at the end of this method, so step 8 below can see whether
                // anything has been queued yet.
                self.sender.fill_window();
            }
        }

        if let Some(ackno) = self.receiver.ackno() {
            if seg.length_in_sequence_space() == 0 && seg.seqno.raw_value() == ackno.raw_value().wrapping_sub(1) {
                self.sender.send_empty_segment();
            }
        }

        if seg.length_in_sequence_space() > 0 && self.sender.segments_out().is_empty() {
            self.sender.send_empty_segment();
        }

        self.drain_sender_segments();
    }

    pub fn send_rst(&mut self) {
        if self.sender.segments_out().is_empty() {
            self.sender.send_empty_segment();
        }
        let mut seg = self
            .sender
            .segments_out()
            .pop_front()
            .expect("an empty segment was just queued if none existed");
        self.stamp(&mut seg);
        seg.flags |= TcpFlags::RST;
        self.segments_out.push_back(seg);

        self.receiver.reassembler_mut().stream_out_mut().set_error();
        self.sender.stream_in_mut().set_error();
        self.reset = true;
    }

    pub fn tick(&mut self, ms_since_last_tick: u64) {
        self.sender.tick(ms_since_last_tick);
        if self.sender.consecutive_retransmissions() > MAX_RETX_ATTEMPTS {
            warn!(
                attempts = self.sender.consecutive_retransmissions(),
                "retransmission limit exceeded, resetting connection"
            );
            self.send_rst();
        }
        self.drain_sender_segments();
        self.time_since_last_segment_received += ms_since_last_tick;
    }

    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = self.sender.stream_in_mut().write(data);
        self.safe_fill_window();
        n
    }

    pub fn end_input_stream(&mut self) {
        self.sender.stream_in_mut().end_input();
        self.safe_fill_window();
    }

    /// Starts the connection: the sender's window is initialized to 1, so
    /// `fill_window` emits a SYN.
    pub fn connect(&mut self) {
        debug!(isn = %self.sender.isn(), "initiating connection");
        self.safe_fill_window();
    }

    /// Passively accepts a peer's initial SYN: records its ISN through the
    /// receiver directly (bypassing the general `segment_received` pipeline,
    /// which would otherwise flush a bare, SYN-less ACK before our own SYN
    /// goes out), then sends our own SYN via `connect`. Because the receiver
    /// already has an `ackno` by the time `fill_window` runs, the resulting
    /// segment is a SYN+ACK, not a bare SYN.
    pub fn accept(&mut self, seg: &TcpSegment) {
        self.time_since_last_segment_received = 0;
        self.receiver.segment_received(seg);
        self.connect();
    }

    /// A coarse, human-readable phase derived from the same predicates that
    /// drive `active()`, used only for `tracing` output.
    pub fn phase(&self) -> ConnectionPhase {
        if self.reset {
            return ConnectionPhase::Reset;
        }
        if self.sender.next_seqno_absolute() == 0 {
            return ConnectionPhase::Handshake;
        }
        if !self.active() {
            return ConnectionPhase::Closed;
        }
        match (self.inbound_active(), self.outbound_active()) {
            (true, true) => ConnectionPhase::Established,
            (true, false) => ConnectionPhase::ClosingLocal,
            (false, true) => ConnectionPhase::ClosingRemote,
            (false, false) => ConnectionPhase::Lingering,
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.active() {
            warn!("unclean shutdown of TcpConnection, sending RST");
            self.send_rst();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::sequence::WrappingInt32;

    fn cfg(rt_timeout: u32, isn: u32) -> StackConfig {
        StackConfig {
            capacity: 4096,
            rt_timeout,
            fixed_isn: Some(isn),
        }
    }

    fn ack_for(ackno: u32, win: u16) -> TcpSegment {
        TcpSegment {
            seqno: WrappingInt32::new(0),
            ackno: WrappingInt32::new(ackno),
            win,
            flags: TcpFlags::ACK,
            payload: Vec::new(),
        }
    }

    #[test]
    fn passive_accept_replies_with_syn_ack() {
        let mut conn = TcpConnection::new(&cfg(1000, 0));
        let peer_syn = TcpSegment::new(WrappingInt32::new(500));
        let mut peer_syn = peer_syn;
        peer_syn.flags = TcpFlags::SYN;
        conn.accept(&peer_syn);

        let reply = conn.segments_out().pop_front().unwrap();
        assert!(reply.syn());
        assert!(reply.ack());
        assert_eq!(reply.ackno.raw_value(), 501);
    }

    #[test]
    fn connect_emits_syn() {
        let mut conn = TcpConnection::new(&cfg(1000, 0));
        conn.connect();
        let seg = conn.segments_out().pop_front().unwrap();
        assert!(seg.syn());
        assert_eq!(seg.seqno.raw_value(), 0);
    }

    #[test]
    fn reset_flag_implies_not_active() {
        let mut conn = TcpConnection::new(&cfg(1000, 0));
        conn.connect();
        conn.segments_out().clear();

        let mut rst = ack_for(1, 1000);
        rst.flags |= TcpFlags::RST;
        conn.segment_received(&rst);

        assert!(conn.reset);
        assert!(!conn.active());
    }

    #[test]
    fn s5_graceful_close_active_side_lingers_then_quiesces() {
        let rt = 1000u32;
        let mut conn = TcpConnection::new(&cfg(rt, 0));
        conn.connect();
        conn.segments_out().clear(); // drop SYN, already asserted elsewhere

        // Peer completes the handshake: SYN+ACK, isn=400.
        let mut synack = TcpSegment::new(WrappingInt32::new(400));
        synack.flags = TcpFlags::SYN | TcpFlags::ACK;
        synack.ackno = WrappingInt32::new(1);
        synack.win = 1000;
        conn.segment_received(&synack);
        conn.segments_out().clear();

        conn.write(b"hi");
        conn.end_input_stream();
        // Drain whatever combination of data/FIN segments were produced.
        let mut saw_fin = false;
        let mut payload = Vec::new();
        while let Some(seg) = conn.segments_out().pop_front() {
            payload.extend(seg.payload.iter());
            saw_fin |= seg.fin();
        }
        assert!(saw_fin);
        assert_eq!(payload, b"hi");

        // Peer ACKs everything we sent.
        let sent_next = conn.sender().next_seqno_absolute();
        let mut ack_all = ack_for(sent_next as u32, 1000);
        ack_all.ackno = WrappingInt32::new(sent_next as u32);
        conn.segment_received(&ack_all);
        assert_eq!(conn.bytes_in_flight(), 0);

        // Peer's FIN arrives after our own FIN was already sent: linger
        // should NOT be cleared (that only happens on a passive close).
        let mut peer_fin = TcpSegment::new(WrappingInt32::new(401));
        peer_fin.flags = TcpFlags::FIN | TcpFlags::ACK;
        peer_fin.ackno = WrappingInt32::new(sent_next as u32);
        peer_fin.win = 1000;
        conn.segment_received(&peer_fin);

        assert!(conn.linger_after_streams_finish);
        assert!(conn.active());

        conn.tick((LINGER_MULTIPLIER * rt) as u64 - 1);
        assert!(conn.active());
        conn.tick(2);
        assert!(!conn.active());
    }

    #[test]
    fn passive_close_clears_linger() {
        let mut conn = TcpConnection::new(&cfg(1000, 0));
        conn.connect();
        conn.segments_out().clear();

        let mut synack = TcpSegment::new(WrappingInt32::new(400));
        synack.flags = TcpFlags::SYN | TcpFlags::ACK;
        synack.ackno = WrappingInt32::new(1);
        synack.win = 1000;
        conn.segment_received(&synack);
        conn.segments_out().clear();

        // Peer closes before we ever call end_input_stream.
        let mut peer_fin = TcpSegment::new(WrappingInt32::new(401));
        peer_fin.flags = TcpFlags::FIN | TcpFlags::ACK;
        peer_fin.ackno = WrappingInt32::new(1);
        peer_fin.win = 1000;
        conn.segment_received(&peer_fin);

        assert!(!conn.linger_after_streams_finish);
    }
}
