//! Reassembles out-of-order, possibly overlapping substrings of a logical
//! byte stream into an in-order `ByteStream`.

use super::byte_stream::ByteStream;

#[derive(Debug)]
pub struct Reassembler {
    stream: ByteStream,
    capacity: usize,
    /// Smallest absolute index not yet emitted to `stream`.
    next_index: u64,
    /// Pending fragments, sorted by `start_index`, pairwise non-overlapping
    /// and non-adjacent (adjacent fragments are always coalesced).
    pending: Vec<(u64, Vec<u8>)>,
    eof_index: Option<u64>,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Reassembler {
            stream: ByteStream::new(capacity),
            capacity,
            next_index: 0,
            pending: Vec::new(),
            eof_index: None,
        }
    }

    pub fn stream_out(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    /// Accepts a substring (possibly out-of-order, possibly overlapping) of
    /// the logical stream and writes any newly contiguous prefix into the
    /// byte stream, staying within `capacity` bytes (reassembled and
    /// not-yet-reassembled combined).
    pub fn push_substring(&mut self, data: &[u8], index: u64, eof: bool) {
        let buffered = self.stream.buffer_size() as u64;
        let first_unacceptable = self.next_index + self.capacity as u64 - buffered;
        let original_end = index + data.len() as u64;

        if eof && original_end <= first_unacceptable {
            self.eof_index = Some(original_end);
        }

        let start = index.max(self.next_index);
        let end = original_end.min(first_unacceptable);

        if end > start {
            let lo = (start - index) as usize;
            let hi = (end - index) as usize;
            self.merge_insert(start, data[lo..hi].to_vec());
        }

        self.drain_ready();

        if let Some(eof_idx) = self.eof_index {
            if self.next_index == eof_idx {
                self.stream.end_input();
            }
        }
    }

    /// Merges `bytes` starting at `start` with any pending fragment it
    /// overlaps or touches, keeping already-pending bytes on conflicts
    /// (they arrived earlier), then re-inserts the coalesced fragment.
    fn merge_insert(&mut self, start: u64, bytes: Vec<u8>) {
        let new_start = start;
        let mut lo = start;
        let mut hi = start + bytes.len() as u64;

        let mut pieces: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut changed = true;
        while changed {
            changed = false;
            let mut i = 0;
            while i < self.pending.len() {
                let (f_start, f_bytes) = &self.pending[i];
                let f_end = f_start + f_bytes.len() as u64;
                if *f_start <= hi && f_end >= lo {
                    lo = lo.min(*f_start);
                    hi = hi.max(f_end);
                    pieces.push(self.pending.remove(i));
                    changed = true;
                } else {
                    i += 1;
                }
            }
        }
        pieces.push((new_start, bytes));

        let len = (hi - lo) as usize;
        let mut canvas: Vec<Option<u8>> = vec![None; len];
        for (fs, fb) in &pieces {
            for (j, b) in fb.iter().enumerate() {
                let pos = (fs + j as u64 - lo) as usize;
                if canvas[pos].is_none() {
                    canvas[pos] = Some(*b);
                }
            }
        }
        let merged: Vec<u8> = canvas.into_iter().map(|b| b.unwrap_or(0)).collect();

        let insert_at = self.pending.partition_point(|(s, _)| *s < lo);
        self.pending.insert(insert_at, (lo, merged));
    }

    fn drain_ready(&mut self) {
        while let Some((start, _)) = self.pending.first() {
            if *start != self.next_index {
                break;
            }
            let (_, bytes) = self.pending.remove(0);
            let written = self.stream.write(&bytes);
            self.next_index += written as u64;
            if written < bytes.len() {
                break;
            }
        }
    }

    /// Number of bytes stored in pending fragments, counting each absolute
    /// index at most once.
    pub fn unassembled_bytes(&self) -> usize {
        self.pending.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn empty(&self) -> bool {
        self.unassembled_bytes() == 0
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}
