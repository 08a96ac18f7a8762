//! A segregated-pool dynamic memory allocator backed by anonymous OS
//! mappings.
//!
//! Requests are rounded up into one of three size classes (small,
//! medium, large), each backed by its own set of fixed-size mappings
//! obtained from a [`Mapper`]. Within a class, free regions are
//! tracked on an intrusive doubly-linked list and served by a
//! configurable [`FitStrategy`]; a region too large for its native
//! class falls back to the next one up. A whole mapping is returned
//! to the OS as soon as its last region is freed.
//!
//! The five operations below ([`allocate`], [`free`],
//! [`zeroed_allocate`], [`reallocate`], [`get_stats`]) work against a
//! single process-wide [`AllocatorContext`], lazily built on first
//! use. Tests and other advanced callers that need an independent
//! heap -- or a [`Mapper`] that fails on demand -- can construct their
//! own `AllocatorContext` directly instead.
mod constants;
mod context;
mod error;
mod fit;
mod mapper;
mod mapping;
mod pool;
mod region;
mod size_class;
mod stats;

use std::ptr::NonNull;

pub use context::AllocatorContext;
pub use error::MapError;
pub use fit::FitStrategy;
pub use mapper::{get_mapper, register_mapper, Mapper};
pub use stats::Stats;

/// Returns a pointer to at least `requested` usable bytes, or the
/// fail sentinel `None` if `requested` is zero or exceeds the largest
/// size class's payload capacity.
pub fn allocate(requested: usize) -> Option<NonNull<u8>> {
    context::with_default(|ctx| ctx.allocate(requested))
}

/// Returns the region behind `ptr` to the allocator. A no-op on the
/// fail sentinel `None`.
pub fn free(ptr: Option<NonNull<u8>>) {
    context::with_default(|ctx| ctx.free(ptr))
}

/// Like [`allocate`], but for `count` contiguous elements of
/// `element_size` bytes each, with the result zeroed. Returns the
/// fail sentinel if `count * element_size` overflows `usize`.
pub fn zeroed_allocate(count: usize, element_size: usize) -> Option<NonNull<u8>> {
    context::with_default(|ctx| ctx.zeroed_allocate(count, element_size))
}

/// Resizes the region behind `ptr` to `new_size` bytes, preserving
/// its contents up to the smaller of the old and new sizes. A
/// `new_size` of zero is equivalent to [`free`]; a `None` `ptr` is
/// equivalent to [`allocate`].
pub fn reallocate(ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
    context::with_default(|ctx| ctx.reallocate(ptr, new_size))
}

/// A snapshot of the default allocator's lifetime counters.
pub fn get_stats() -> Stats {
    context::with_default(|ctx| ctx.get_stats())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn public_api_round_trips_through_the_default_context() {
        let p = allocate(128).expect("should allocate");
        unsafe {
            *p.as_ptr() = 42;
        }
        assert_eq!(unsafe { *p.as_ptr() }, 42);
        free(Some(p));
    }

    #[test]
    fn zeroed_allocate_zeroes_the_requested_prefix() {
        let p = zeroed_allocate(16, 4).expect("should allocate");
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        free(Some(p));
    }

    #[test]
    fn zeroed_allocate_refuses_overflowing_products() {
        assert!(zeroed_allocate(usize::MAX, 2).is_none());
    }
}
