//! Requests and releases whole backing mappings from a `Mapper`, and
//! maintains the monotonically increasing mapping-id counter.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use crate::mapper::Mapper;
use crate::pool::Pool;
use crate::region::{RegionRef, HEADER_SIZE};
use crate::size_class::SizeClass;

/// Asks `mapper` for a fresh mapping of `class`'s size, assigns it
/// `mapping_id`, and prepends the single free region spanning it to
/// `pool`.  Returns that region, or `None` if the mapper refused.
#[requires(pool.head().map_or(true, |h| h.size_class() == class))]
pub(crate) fn new_mapping(
    pool: &mut Pool,
    class: SizeClass,
    mapper: &dyn Mapper,
    mapping_id: u64,
) -> Option<RegionRef> {
    let base = mapper.map(class.mapping_bytes()).ok()?;
    let payload_size = class.mapping_bytes() - HEADER_SIZE;

    let region = RegionRef::init(base, mapping_id, class, payload_size, /*free=*/ true);
    pool.adopt_new_mapping(region);
    Some(region)
}

/// Returns a whole, fully-idle mapping to the OS.
///
/// # Preconditions
///
/// `region` must span its entire mapping and be free.
#[requires(region.is_free())]
#[requires(region.spans_whole_mapping())]
pub(crate) fn release_mapping(pool: &mut Pool, region: RegionRef, mapper: &dyn Mapper) {
    pool.unlink(region);
    pool.sub_available(region.payload_size());

    // SAFETY: `region` spans its entire mapping, which was obtained
    // from a single `mapper.map(region.size_class().mapping_bytes())`
    // call and has not been unmapped since.
    unsafe {
        mapper.unmap(region.base(), region.size_class().mapping_bytes());
    }
}
