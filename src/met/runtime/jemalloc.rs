//! Allocator controls not covered by the typed `tikv_jemalloc_ctl` wrappers.
//!
//! The arena-wide purge and the per-arena allocation counters only exist as
//! raw `mallctl` names, so the unsafe calls are kept here behind two safe
//! functions. Everything else reads through `tikv_jemalloc_ctl::stats`.

use super::MemStats;

/// `MALLCTL_ARENAS_ALL`, addresses every arena at once
#[cfg(not(target_env = "msvc"))]
const ALL_ARENAS: &str = "4096";

/// Returns dirty pages of every arena to the OS, `Err` carries the mallctl code
#[cfg(not(target_env = "msvc"))]
pub(super) fn purge() -> Result<(), i32> {
    let name = format!("arena.{}.purge\0", ALL_ARENAS);
    // SAFETY: `name` is NUL-terminated and the purge control takes no input
    // or output buffers.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            name.as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(rc)
    }
}

#[cfg(target_env = "msvc")]
pub(super) fn purge() -> Result<(), i32> {
    Ok(())
}

/// Reads a `u64` statistic by its NUL-terminated mallctl name
#[cfg(not(target_env = "msvc"))]
fn counter(name: &str) -> tikv_jemalloc_ctl::Result<u64> {
    debug_assert!(name.ends_with('\0'));
    // SAFETY: callers pass NUL-terminated names of `uint64_t` statistics, the
    // only type `raw::read::<u64>` may decode.
    unsafe { tikv_jemalloc_ctl::raw::read::<u64>(name.as_bytes()) }
}

/// Fills the heap fields of `stats`, leaving zeros for anything unreadable
#[cfg(not(target_env = "msvc"))]
pub(super) fn read_heap(stats: &mut MemStats) {
    use tikv_jemalloc_ctl::{epoch, stats as je};

    // jemalloc caches its statistics until the epoch advances
    if epoch::advance().is_err() {
        return;
    }
    let read = |r: tikv_jemalloc_ctl::Result<usize>| r.map_or(0, |v| v as u64);
    stats.allocated = read(je::allocated::read());
    stats.heap_active = read(je::active::read());
    stats.heap_resident = read(je::resident::read());
    stats.heap_mapped = read(je::mapped::read());
    stats.heap_retained = read(je::retained::read());
    stats.heap_metadata = read(je::metadata::read());

    let arena = |class: &str, op: &str| {
        counter(&format!("stats.arenas.{}.{}.{}\0", ALL_ARENAS, class, op)).unwrap_or(0)
    };
    stats.mallocs = arena("small", "nmalloc") + arena("large", "nmalloc");
    stats.frees = arena("small", "ndalloc") + arena("large", "ndalloc");
}

#[cfg(target_env = "msvc")]
pub(super) fn read_heap(_stats: &mut MemStats) {}
