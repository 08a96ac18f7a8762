//! A `Mapper` is responsible for acquiring and releasing whole,
//! page-aligned anonymous mappings from the operating system.  Every
//! `AllocatorContext` is parameterized on one.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::MapError;

/// Acquires and releases whole backing mappings.  `bytes` is always a
/// size-class's whole mapping size (16 KiB / 1 MiB / 32 MiB by
/// default), never an arbitrary request size.
#[contract_trait]
pub trait Mapper: std::fmt::Debug + Sync {
    /// Returns a fresh, zero-filled, page-aligned, readable/writable
    /// private mapping of exactly `bytes` length.
    #[requires(bytes > 0)]
    fn map(&self, bytes: usize) -> Result<NonNull<u8>, MapError>;

    /// Releases a mapping previously returned by a single call to
    /// `map` with the same `bytes`.
    ///
    /// # Safety
    ///
    /// `base` must be a pointer previously returned by `map(bytes)` on
    /// this same mapper, not already unmapped.
    unsafe fn unmap(&self, base: NonNull<u8>, bytes: usize);
}

/// The production `Mapper`: anonymous, private `mmap`/`munmap`.
#[derive(Debug)]
pub struct OsMapper;

#[cfg(unix)]
#[contract_trait]
impl Mapper for OsMapper {
    fn map(&self, bytes: usize) -> Result<NonNull<u8>, MapError> {
        // SAFETY: a fixed set of well-understood flags requesting an
        // anonymous, private mapping; the kernel chooses the address.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(MapError(unsafe { *libc::__errno_location() }));
        }

        Ok(NonNull::new(addr as *mut u8).expect("a successful mmap never returns NULL"))
    }

    unsafe fn unmap(&self, base: NonNull<u8>, bytes: usize) {
        let ret = libc::munmap(base.as_ptr() as *mut libc::c_void, bytes);
        debug_assert_eq!(ret, 0, "munmap of a region we previously mapped should not fail");
    }
}

#[cfg(unix)]
pub(crate) fn os_page_size() -> usize {
    lazy_static::lazy_static! {
        static ref PAGE_SIZE: usize = {
            let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if ret <= 0 {
                4096
            } else {
                ret as usize
            }
        };
    }

    *PAGE_SIZE
}

lazy_static::lazy_static! {
    static ref DEFAULT_MAPPER: OsMapper = OsMapper;
    static ref NAMED_MAPPERS: Mutex<HashMap<String, &'static dyn Mapper>> = Mutex::new(HashMap::new());
}

/// Registers (or replaces) the mapper associated with `name`, so a
/// context can later be built against it via `get_mapper(Some(name))`.
///
/// Intended for tests that want to simulate mapping failures; not on
/// any allocation hot path.
pub fn register_mapper(name: String, mapper: &'static dyn Mapper) {
    NAMED_MAPPERS.lock().unwrap().insert(name, mapper);
}

/// Returns the mapper registered under `name`, or the default
/// OS-backed mapper if `name` is `None`.
///
/// # Errors
///
/// Returns `Err` if `name` is `Some` but no such mapper was
/// registered.
pub fn get_mapper(name: Option<&str>) -> Result<&'static dyn Mapper, &'static str> {
    match name {
        Some(key) => {
            let mappers = NAMED_MAPPERS.lock().unwrap();
            mappers.get(key).copied().ok_or("no mapper registered under that name")
        }
        None => Ok(&*DEFAULT_MAPPER),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn os_mapper_roundtrips() {
        let mapper = OsMapper;
        let bytes = os_page_size();
        let base = mapper.map(bytes).expect("map should succeed");

        // Freshly mapped anonymous memory must be zero-filled.
        let slice = unsafe { std::slice::from_raw_parts(base.as_ptr(), bytes) };
        assert!(slice.iter().all(|&b| b == 0));

        unsafe { mapper.unmap(base, bytes) };
    }

    #[derive(Debug)]
    struct AlwaysFailsMapper;

    #[contract_trait]
    impl Mapper for AlwaysFailsMapper {
        fn map(&self, _bytes: usize) -> Result<NonNull<u8>, MapError> {
            Err(MapError(libc::ENOMEM))
        }

        unsafe fn unmap(&self, _base: NonNull<u8>, _bytes: usize) {
            unreachable!("a mapper that never maps anything is never asked to unmap")
        }
    }

    #[test]
    fn registry_roundtrips_named_mappers() {
        lazy_static::lazy_static! {
            static ref FAILING: AlwaysFailsMapper = AlwaysFailsMapper;
        }

        register_mapper("test-always-fails".to_string(), &*FAILING);
        let mapper = get_mapper(Some("test-always-fails")).expect("should be registered");
        assert!(mapper.map(4096).is_err());

        assert!(get_mapper(Some("does-not-exist")).is_err());
    }
}
