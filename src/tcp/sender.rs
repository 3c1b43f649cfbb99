//! Reads the outbound byte stream, produces segments, tracks bytes in
//! flight, and retransmits on timeout with exponential backoff.

use std::collections::VecDeque;

use rand::Rng;

use crate::config::MAX_PAYLOAD_SIZE;

use super::byte_stream::ByteStream;
use super::segment::{TcpFlags, TcpSegment};
use super::sequence::{unwrap, wrap, WrappingInt32};

#[derive(Debug)]
pub struct TcpSender {
    isn: WrappingInt32,
    initial_rto: u64,
    rto: u64,
    stream: ByteStream,
    next_seqno: u64,
    outstanding: VecDeque<TcpSegment>,
    bytes_in_flight: usize,
    consecutive_retx: u32,
    /// Last window size advertised by the peer; initially 1.
    window_size: u16,
    timer_running: bool,
    timer_expires_in: u64,
    segments_out: VecDeque<TcpSegment>,
}

impl TcpSender {
    pub fn new(capacity: usize, rt_timeout: u32, fixed_isn: Option<WrappingInt32>) -> Self {
        let isn = fixed_isn.unwrap_or_else(|| WrappingInt32::new(rand::thread_rng().gen()));
        TcpSender {
            isn,
            initial_rto: rt_timeout as u64,
            rto: rt_timeout as u64,
            stream: ByteStream::new(capacity),
            next_seqno: 0,
            outstanding: VecDeque::new(),
            bytes_in_flight: 0,
            consecutive_retx: 0,
            window_size: 1,
            timer_running: false,
            timer_expires_in: 0,
            segments_out: VecDeque::new(),
        }
    }

    pub fn isn(&self) -> WrappingInt32 {
        self.isn
    }

    pub fn stream_in(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_in_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seqno
    }

    pub fn next_seqno(&self) -> WrappingInt32 {
        wrap(self.next_seqno, self.isn)
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.consecutive_retx
    }

    pub fn segments_out(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }

    fn push_segment(&mut self, seg: TcpSegment) {
        let len = seg.length_in_sequence_space();
        self.segments_out.push_back(seg.clone());
        if len > 0 {
            self.outstanding.push_back(seg);
            self.bytes_in_flight += len;
            self.next_seqno += len as u64;
            if !self.timer_running {
                self.timer_running = true;
                self.timer_expires_in = self.rto;
            }
        }
    }

    /// Sends as many segments as the window allows, treating an advertised
    /// window of 0 as 1 (to probe).
    pub fn fill_window(&mut self) {
        let effective_window = if self.window_size == 0 {
            1usize
        } else {
            self.window_size as usize
        };

        loop {
            if self.bytes_in_flight >= effective_window {
                break;
            }
            let fin_already_sent =
                self.stream.eof() && self.next_seqno == self.stream.bytes_written() + 2;
            if fin_already_sent {
                break;
            }

            let mut seg = TcpSegment::new(wrap(self.next_seqno, self.isn));
            let mut syn_cost = 0usize;
            if self.next_seqno == 0 {
                seg.flags |= TcpFlags::SYN;
                syn_cost = 1;
            }

            let window_remaining = effective_window - self.bytes_in_flight;
            let payload_budget = window_remaining
                .saturating_sub(syn_cost)
                .min(MAX_PAYLOAD_SIZE);
            if payload_budget > 0 {
                seg.payload = self.stream.read(payload_budget);
            }

            let used_so_far = syn_cost + seg.payload.len();
            if self.stream.eof() && used_so_far < window_remaining {
                seg.flags |= TcpFlags::FIN;
            }

            if seg.length_in_sequence_space() == 0 {
                break;
            }

            self.push_segment(seg);
        }
    }

    pub fn ack_received(&mut self, ackno: WrappingInt32, window_size: u16) {
        let abs_ack = unwrap(ackno, self.isn, self.next_seqno);
        if abs_ack > self.next_seqno {
            // Impossible ack: acknowledges bytes we haven't sent.
            return;
        }

        self.window_size = window_size;

        let mut acked_any = false;
        while let Some(seg) = self.outstanding.front() {
            let seg_abs_seqno = unwrap(seg.seqno, self.isn, self.next_seqno);
            let seg_end = seg_abs_seqno + seg.length_in_sequence_space() as u64;
            if seg_end <= abs_ack {
                let seg = self.outstanding.pop_front().expect("front just checked");
                self.bytes_in_flight -= seg.length_in_sequence_space();
                acked_any = true;
            } else {
                break;
            }
        }

        if acked_any {
            self.rto = self.initial_rto;
            self.consecutive_retx = 0;
            if !self.outstanding.is_empty() {
                self.timer_running = true;
                self.timer_expires_in = self.rto;
            } else {
                self.timer_running = false;
            }
        }
    }

    pub fn tick(&mut self, ms_since_last_tick: u64) {
        if !self.timer_running {
            return;
        }
        if ms_since_last_tick < self.timer_expires_in {
            self.timer_expires_in -= ms_since_last_tick;
            return;
        }

        if let Some(seg) = self.outstanding.front().cloned() {
            self.segments_out.push_back(seg);
        }
        if self.window_size > 0 {
            self.consecutive_retx += 1;
            self.rto *= 2;
        }
        self.timer_expires_in = self.rto;
        self.timer_running = true;
    }

    /// Emits an empty segment at the current seqno; it carries no sequence
    /// space so it is not tracked in `outstanding`.
    pub fn send_empty_segment(&mut self) {
        let seg = TcpSegment::new(wrap(self.next_seqno, self.isn));
        self.segments_out.push_back(seg);
    }
}
