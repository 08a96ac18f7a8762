//! A `Pool` is the set of all regions of one size class, chained in a
//! single doubly-linked list threaded through every mapping of that
//! class (new mappings are prepended; within one mapping, `next`
//! walks up in address order).
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use crate::region::RegionRef;
use crate::size_class::SizeClass;

pub(crate) struct Pool {
    size_class: SizeClass,
    head: Option<RegionRef>,
    available_bytes: usize,
}

impl Pool {
    pub(crate) fn new(size_class: SizeClass) -> Pool {
        Pool {
            size_class,
            head: None,
            available_bytes: 0,
        }
    }

    #[inline]
    pub(crate) fn available_bytes(&self) -> usize {
        self.available_bytes
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<RegionRef> {
        self.head
    }

    /// Prepends a brand-new mapping's sole free region to this pool,
    /// and credits its payload to `available_bytes`.
    #[requires(region.size_class() == self.size_class)]
    #[requires(region.is_free())]
    pub(crate) fn adopt_new_mapping(&mut self, mut region: RegionRef) {
        region.set_prev(None);
        region.set_next(self.head);
        if let Some(mut old_head) = self.head {
            old_head.set_prev(Some(region));
        }
        self.head = Some(region);
        self.available_bytes += region.payload_size();
    }

    /// Removes `region` from this pool's list, wiring its neighbors
    /// together. Does not touch `available_bytes`; callers adjust it
    /// themselves since the right adjustment (subtract payload, or
    /// not adjust at all because the bytes moved to a coalesced
    /// neighbor) depends on why the region is being removed.
    pub(crate) fn unlink(&mut self, region: RegionRef) {
        let prev = region.prev();
        let next = region.next();

        match prev {
            Some(mut p) => p.set_next(next),
            None => self.head = next,
        }
        if let Some(mut n) = next {
            n.set_prev(prev);
        }
    }

    pub(crate) fn add_available(&mut self, bytes: usize) {
        self.available_bytes += bytes;
    }

    pub(crate) fn sub_available(&mut self, bytes: usize) {
        self.available_bytes -= bytes;
    }

    /// First-fit: the first free region in list order with payload
    /// size at least `size`.
    ///
    /// Accepts an exact-size match rather than skipping it; see
    /// DESIGN.md.
    pub(crate) fn first_fit(&self, size: usize) -> Option<RegionRef> {
        let mut cursor = self.head;
        while let Some(region) = cursor {
            if region.is_free() && region.payload_size() >= size {
                return Some(region);
            }
            cursor = region.next();
        }
        None
    }

    /// Best-fit: among all free regions sharing the first-fit
    /// region's mapping, the smallest one that still satisfies
    /// `size`; exact matches return immediately; ties go to the
    /// earliest in list order.
    pub(crate) fn best_fit(&self, size: usize) -> Option<RegionRef> {
        let first = self.first_fit(size)?;
        let mapping_id = first.mapping_id();

        let mut best = first;
        let mut cursor = self.head;
        while let Some(region) = cursor {
            if region.mapping_id() != mapping_id {
                cursor = region.next();
                continue;
            }
            if region.is_free() {
                if region.payload_size() == size {
                    return Some(region);
                }
                if region.payload_size() > size && region.payload_size() < best.payload_size() {
                    best = region;
                }
            }
            cursor = region.next();
        }
        Some(best)
    }

    /// Sums the payload bytes of every free region in this pool.
    /// Used by tests to check that `available_bytes` never drifts.
    #[cfg(test)]
    pub(crate) fn recompute_available_bytes(&self) -> usize {
        let mut total = 0;
        let mut cursor = self.head;
        while let Some(region) = cursor {
            if region.is_free() {
                total += region.payload_size();
            }
            cursor = region.next();
        }
        total
    }

    /// Checks that no two same-mapping neighbors in this pool's list
    /// are both free. Used by tests.
    #[cfg(test)]
    pub(crate) fn check_no_adjacent_free(&self) -> bool {
        let mut cursor = self.head;
        while let Some(region) = cursor {
            if let Some(next) = region.next() {
                if region.is_free() && next.is_free() && region.mapping_id() == next.mapping_id() {
                    return false;
                }
            }
            cursor = region.next();
        }
        true
    }
}
