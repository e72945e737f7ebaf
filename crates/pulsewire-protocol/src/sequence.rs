//! Wrapping sequence-number ordering.
//!
//! Sequence numbers are 16-bit and wrap; a plain integer comparison is wrong
//! across the wrap boundary, so every ordering decision goes through these
//! half-range comparisons.

/// Returns true when `s1` is newer than `s2` under wrapping arithmetic.
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// Returns true when `s1` is older than `s2` under wrapping arithmetic.
pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}
