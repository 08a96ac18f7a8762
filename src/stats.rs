//! Read-only lifetime counters.

/// A snapshot of the allocator's lifetime counters.
///
/// `requested_bytes` is the running total of bytes callers actually
/// asked for (before rounding/alignment), adjusted by reallocate's
/// delta; it is not a monotone counter and can move in either
/// direction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Stats {
    pub allocs: u64,
    pub frees: u64,
    pub requested_bytes: i64,
}
