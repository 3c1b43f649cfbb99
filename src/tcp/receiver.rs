//! Consumes incoming segments, maintains a reassembler, and produces the
//! ackno/window pair advertised back to the peer.

use super::reassembler::Reassembler;
use super::segment::TcpSegment;
use super::sequence::{unwrap, wrap, WrappingInt32};

#[derive(Debug)]
pub struct TcpReceiver {
    isn: Option<WrappingInt32>,
    syn_seen: bool,
    fin_seen: bool,
    reassembler: Reassembler,
}

impl TcpReceiver {
    pub fn new(capacity: usize) -> Self {
        TcpReceiver {
            isn: None,
            syn_seen: false,
            fin_seen: false,
            reassembler: Reassembler::new(capacity),
        }
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn reassembler_mut(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        if seg.syn() {
            self.isn = Some(seg.seqno);
            self.syn_seen = true;
        }

        let Some(isn) = self.isn else {
            // SYN not observed yet: discard.
            return;
        };

        if seg.fin() {
            self.fin_seen = true;
        }

        // The first data byte sits at seqno isn+1; a segment's own seqno
        // already accounts for a leading SYN, so only +1 when SYN is also
        // set on *this* segment.
        let seqno_of_first_data_byte = if seg.syn() { seg.seqno + 1 } else { seg.seqno };
        let checkpoint = self.reassembler.stream_out().bytes_written();
        // saturating: a SYN observed at stream start unwraps to 1, never 0,
        // but malformed input could otherwise drive this to 0.
        let index = unwrap(seqno_of_first_data_byte, isn, checkpoint).saturating_sub(1);

        self.reassembler
            .push_substring(&seg.payload, index, seg.fin());
    }

    pub fn ackno(&self) -> Option<WrappingInt32> {
        let isn = self.isn?;
        let mut n = self.reassembler.stream_out().bytes_written() + 1;
        if self.fin_seen && self.reassembler.empty() {
            n += 1;
        }
        Some(wrap(n, isn))
    }

    pub fn window_size(&self) -> u16 {
        self.reassembler
            .stream_out()
            .remaining_capacity()
            .min(u16::MAX as usize) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::segment::TcpFlags;

    fn syn(seqno: u32, win: u16) -> TcpSegment {
        TcpSegment {
            seqno: WrappingInt32::new(seqno),
            ackno: WrappingInt32::new(0),
            win,
            flags: TcpFlags::SYN,
            payload: Vec::new(),
        }
    }

    #[test]
    fn discards_segments_before_syn_observed() {
        let mut r = TcpReceiver::new(1000);
        let mut data = TcpSegment::new(WrappingInt32::new(5));
        data.payload = b"hi".to_vec();
        r.segment_received(&data);
        assert!(r.ackno().is_none());
        assert_eq!(r.reassembler().stream_out().buffer_size(), 0);
    }

    #[test]
    fn syn_then_data_advances_ackno() {
        let mut r = TcpReceiver::new(1000);
        r.segment_received(&syn(0, 10));
        assert_eq!(r.ackno().unwrap().raw_value(), 1);

        let mut data = TcpSegment::new(WrappingInt32::new(1));
        data.payload = b"hi".to_vec();
        r.segment_received(&data);
        assert_eq!(r.ackno().unwrap().raw_value(), 3);
        assert_eq!(r.reassembler().stream_out().buffer_size(), 2);
    }

    #[test]
    fn s5_ackno_includes_fin_once_fully_reassembled() {
        let mut r = TcpReceiver::new(1000);
        r.segment_received(&syn(0, 10));

        let mut fin_seg = TcpSegment::new(WrappingInt32::new(1));
        fin_seg.payload = b"hi".to_vec();
        fin_seg.flags = TcpFlags::FIN;
        r.segment_received(&fin_seg);

        // ackno = bytes_written + 1 (SYN) + 1 (FIN, fully reassembled)
        assert_eq!(r.ackno().unwrap().raw_value(), 4);
    }

    #[test]
    fn window_size_is_clamped_to_u16_max() {
        let r = TcpReceiver::new(200_000);
        assert_eq!(r.window_size(), u16::MAX);
    }
}
