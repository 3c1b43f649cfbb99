//! A bounded, single-threaded FIFO of bytes with an end-of-input flag and an
//! error flag.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct ByteStream {
    buffer: VecDeque<u8>,
    capacity: usize,
    bytes_written: u64,
    bytes_read: u64,
    input_ended: bool,
    error: bool,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        ByteStream {
            buffer: VecDeque::new(),
            capacity,
            bytes_written: 0,
            bytes_read: 0,
            input_ended: false,
            error: false,
        }
    }

    /// Accepts as many bytes of `data` as fit in the remaining capacity.
    /// Returns the number of bytes actually accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.input_ended {
            return 0;
        }
        let accepted = data.len().min(self.remaining_capacity());
        self.buffer.extend(&data[..accepted]);
        self.bytes_written += accepted as u64;
        accepted
    }

    /// Returns up to `len` bytes from the front of the stream without
    /// consuming them.
    pub fn peek(&self, len: usize) -> Vec<u8> {
        let len = len.min(self.buffer.len());
        self.buffer.iter().take(len).copied().collect()
    }

    /// Advances the read cursor past up to `len` bytes.
    pub fn pop(&mut self, len: usize) {
        let len = len.min(self.buffer.len());
        self.buffer.drain(..len);
        self.bytes_read += len as u64;
    }

    /// Convenience for `peek` followed by `pop`.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let out = self.peek(len);
        self.pop(out.len());
        out
    }

    pub fn end_input(&mut self) {
        self.input_ended = true;
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True once input has ended and every byte has been read, or once the
    /// stream has entered the error state (reads then act as synthetic EOF).
    pub fn eof(&self) -> bool {
        self.error || (self.input_ended && self.buffer_empty())
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_byte_stream_echo() {
        let mut bs = ByteStream::new(2);
        assert_eq!(bs.write(b"cat"), 2);
        assert_eq!(bs.read(1), b"c");
        assert_eq!(bs.remaining_capacity(), 1);
        assert_eq!(bs.write(b"t"), 1);
        assert_eq!(bs.read(2), b"at");
        bs.end_input();
        assert!(bs.eof());
    }

    #[test]
    fn invariant_buffer_size_matches_written_minus_read() {
        let mut bs = ByteStream::new(10);
        bs.write(b"hello");
        bs.pop(2);
        assert_eq!(
            bs.bytes_written() - bs.bytes_read(),
            bs.buffer_size() as u64
        );
        assert!(bs.buffer_size() <= bs.capacity());
    }

    #[test]
    fn write_after_end_input_is_rejected() {
        let mut bs = ByteStream::new(10);
        bs.end_input();
        assert_eq!(bs.write(b"no"), 0);
    }

    #[test]
    fn error_forces_synthetic_eof_even_with_buffered_bytes() {
        let mut bs = ByteStream::new(10);
        bs.write(b"hi");
        bs.set_error();
        assert!(bs.eof());
    }
}
