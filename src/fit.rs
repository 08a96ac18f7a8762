//! Free-region search strategy and the size-class fallback policy
//! that ties the three pools together.
use crate::pool::Pool;
use crate::region::RegionRef;
use crate::size_class::SizeClass;

/// Selects how a pool's free list is searched for a fit.  A policy
/// field on `AllocatorContext` rather than a `cfg` flag, so a single
/// test binary can exercise every strategy (see DESIGN.md).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FitStrategy {
    FirstFit,
    BestFit,
    /// Never search; every allocation grows the heap.
    GrowOnly,
}

impl FitStrategy {
    fn search(self, pool: &Pool, size: usize) -> Option<RegionRef> {
        match self {
            FitStrategy::FirstFit => pool.first_fit(size),
            FitStrategy::BestFit => pool.best_fit(size),
            FitStrategy::GrowOnly => None,
        }
    }
}

/// Searches `native_class`'s pool first, falling back to
/// successively larger pools when the native class can't satisfy
/// `size` -- either because its `available_bytes` gate says so, or
/// because the chosen strategy finds nothing despite the gate
/// passing. LARGE requests never escalate further.
pub(crate) fn find_free_region(
    pools: &[Pool; 3],
    strategy: FitStrategy,
    native_class: SizeClass,
    size: usize,
) -> Option<RegionRef> {
    let mut candidates = std::iter::once(native_class).chain(native_class.fallbacks().iter().copied());

    candidates.find_map(|class| {
        let pool = &pools[class.index()];
        if pool.available_bytes() < size {
            return None;
        }
        strategy.search(pool, size)
    })
}
