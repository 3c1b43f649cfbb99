//! Wrapping 32-bit sequence numbers and the bijection to absolute 64-bit
//! stream indices.

use std::fmt;
use std::ops::Add;

/// A 32-bit value with addition modulo 2^32, as used for TCP seqnos/acknos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrappingInt32(u32);

impl WrappingInt32 {
    pub fn new(raw: u32) -> Self {
        WrappingInt32(raw)
    }

    pub fn raw_value(self) -> u32 {
        self.0
    }
}

impl Add<u32> for WrappingInt32 {
    type Output = WrappingInt32;

    fn add(self, rhs: u32) -> WrappingInt32 {
        WrappingInt32(self.0.wrapping_add(rhs))
    }
}

impl fmt::Display for WrappingInt32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transforms an absolute 64-bit sequence number (zero-indexed) into a
/// `WrappingInt32` relative to `isn`.
pub fn wrap(n: u64, isn: WrappingInt32) -> WrappingInt32 {
    WrappingInt32(isn.raw_value().wrapping_add(n as u32))
}

/// Transforms a `WrappingInt32` into the absolute 64-bit sequence number
/// congruent to it mod 2^32 that is closest to `checkpoint` (ties broken
/// toward the larger result).
pub fn unwrap(n: WrappingInt32, isn: WrappingInt32, checkpoint: u64) -> u64 {
    let offset = n.raw_value().wrapping_sub(isn.raw_value()) as u64;

    // Candidate in the same "epoch" (top 32 bits) as the checkpoint.
    let base = checkpoint & !0xFFFF_FFFFu64;
    let candidate = base + offset;

    let full = 1u64 << 32;

    // Among candidate, candidate - 2^32 and candidate + 2^32, pick whichever
    // is closest to checkpoint; on an exact tie prefer the larger one.
    let mut best = candidate;
    let mut best_dist = checkpoint.abs_diff(candidate);

    if candidate >= full {
        let lower = candidate - full;
        let dist = checkpoint.abs_diff(lower);
        if dist < best_dist || (dist == best_dist && lower > best) {
            best = lower;
            best_dist = dist;
        }
    }

    let upper = candidate + full;
    let dist = checkpoint.abs_diff(upper);
    if dist < best_dist || (dist == best_dist && upper > best) {
        best = upper;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip_near_checkpoint() {
        let isn = WrappingInt32::new(0);
        for n in [0u64, 1, 2, 3, 100, 1 << 20, (1u64 << 32) - 1] {
            let w = wrap(n, isn);
            assert_eq!(unwrap(w, isn, n), n);
        }
    }

    #[test]
    fn s3_wrap_unwrap_specific_checkpoints() {
        let isn = WrappingInt32::new(0);
        let n: u64 = (1u64 << 32) + 15;
        assert_eq!(unwrap(wrap(n, isn), isn, (1u64 << 31) + 5), n);

        let isn = WrappingInt32::new(0);
        assert_eq!(unwrap(wrap(7, isn), isn, 3), 7);
    }

    #[test]
    fn unwrap_prefers_closest_to_checkpoint() {
        let isn = WrappingInt32::new(0);
        let checkpoint = 5 * (1u64 << 32);
        let got = unwrap(WrappingInt32::new(10), isn, checkpoint);
        assert_eq!(got, checkpoint + 10);
    }

    #[test]
    fn nonzero_isn_offsets_correctly() {
        let isn = WrappingInt32::new(1_000_000);
        let n = 500_000u64;
        let w = wrap(n, isn);
        assert_eq!(unwrap(w, isn, n), n);
    }
}
