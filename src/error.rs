//! Error types for the ambient `Mapper` collaborator.
use std::fmt;

/// Wraps the raw OS error code (`errno` on Unix) from a failed
/// `Mapper::map` or `Mapper::unmap` call.
///
/// This never crosses the public allocate/free/realloc API: those
/// operations only ever report failure via the fail sentinel.
/// `MapError` exists so the mapper layer itself, and tests that
/// inject mapping failures, can distinguish *why* a mapping attempt
/// failed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MapError(pub i32);

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mapping operation failed with OS error code {}", self.0)
    }
}

impl std::error::Error for MapError {}
