//! Memory Reclamation Pauses
//!
//! A process-wide ring of the most recent reclamation pauses. Every call to
//! [`reclaim`] (or [`record_pause`]) counts as one cycle.

use parking_lot::{const_mutex, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Number of pauses kept in the ring
pub const PAUSE_RING_SIZE: usize = 256;

/// Copy of the ring and its counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseHistory {
    pub pauses: [u64; PAUSE_RING_SIZE],
    pub cycles: u32,
    pub total_ns: u64,
    /// Unix time of the last cycle in nanoseconds, 0 if none happened
    pub last_ns: u64,
}

impl Default for PauseHistory {
    fn default() -> Self {
        PauseHistory::new()
    }
}

impl PauseHistory {
    const fn new() -> Self {
        PauseHistory {
            pauses: [0; PAUSE_RING_SIZE],
            cycles: 0,
            total_ns: 0,
            last_ns: 0,
        }
    }

    fn push(&mut self, pause: Duration) {
        let ns = u64::try_from(pause.as_nanos()).unwrap_or(u64::MAX);
        self.pauses[self.cycles as usize % PAUSE_RING_SIZE] = ns;
        self.cycles = self.cycles.wrapping_add(1);
        self.total_ns = self.total_ns.saturating_add(ns);
        self.last_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
    }
}

static RING: Mutex<PauseHistory> = const_mutex(PauseHistory::new());

/// Records one reclamation cycle that stopped the caller for `pause`
pub fn record_pause(pause: Duration) {
    RING.lock().push(pause);
}

/// Current state of the process ring
pub fn history() -> PauseHistory {
    *RING.lock()
}

/// Returns dirty allocator pages to the OS and records the time it took
pub fn reclaim() -> Duration {
    let start = Instant::now();
    purge();
    let pause = start.elapsed();
    record_pause(pause);
    pause
}

fn purge() {
    if let Err(code) = super::jemalloc::purge() {
        crate::debug!(code, "jemalloc purge failed");
    }
}

/// Pauses written since cycle `prev`, oldest first.
///
/// When `ring.len()` or more cycles happened in between, older entries have
/// been overwritten and the whole ring is returned once in chronological
/// order.
pub fn new_pauses(ring: &[u64], prev: u32, now: u32) -> Vec<u64> {
    let len = ring.len();
    if len == 0 {
        return Vec::new();
    }

    if now.wrapping_sub(prev) as usize >= len {
        let oldest = now as usize % len;
        return ring[oldest..].iter().chain(&ring[..oldest]).copied().collect();
    }

    let start = prev as usize % len;
    let end = now as usize % len;
    if start <= end {
        ring[start..end].to_vec()
    } else {
        ring[start..].iter().chain(&ring[..end]).copied().collect()
    }
}
