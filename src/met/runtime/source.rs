use sysinfo::{Pid, System};

use super::jemalloc::read_heap;
use super::pauses::{self, PAUSE_RING_SIZE};

/// Memory statistics sampled once per report cycle
#[derive(Debug, Clone, PartialEq)]
pub struct MemStats {
    /// Resident set size in bytes
    pub resident: u64,
    pub virtual_mem: u64,
    /// Bytes allocated by the application
    pub allocated: u64,
    /// Cumulative allocation count
    pub mallocs: u64,
    /// Cumulative deallocation count
    pub frees: u64,
    pub heap_active: u64,
    pub heap_resident: u64,
    pub heap_mapped: u64,
    pub heap_retained: u64,
    pub heap_metadata: u64,
    /// Completed reclamation cycles
    pub num_gc: u32,
    /// Unix time of the last cycle in nanoseconds
    pub last_gc: u64,
    pub pause_total_ns: u64,
    pub pause_ns: [u64; PAUSE_RING_SIZE],
}

impl Default for MemStats {
    fn default() -> Self {
        MemStats {
            resident: 0,
            virtual_mem: 0,
            allocated: 0,
            mallocs: 0,
            frees: 0,
            heap_active: 0,
            heap_resident: 0,
            heap_mapped: 0,
            heap_retained: 0,
            heap_metadata: 0,
            num_gc: 0,
            last_gc: 0,
            pause_total_ns: 0,
            pause_ns: [0; PAUSE_RING_SIZE],
        }
    }
}

impl MemStats {
    /// Live heap objects
    pub fn heap_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessStats {
    pub threads: u64,
    /// CPU usage in percent of one core
    pub cpu: f64,
}

/// Where the runtime reporter reads its numbers from
pub trait StatsSource: Send {
    /// Called once at the start of every cycle
    fn refresh(&mut self);

    fn read_mem(&mut self) -> MemStats;

    fn process(&self) -> ProcessStats;
}

/// Reads the current process through sysinfo and jemalloc
pub struct SystemStats {
    system: System,
    pid: Option<Pid>,
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStats {
    pub fn new() -> Self {
        SystemStats {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl StatsSource for SystemStats {
    fn refresh(&mut self) {
        if let Some(pid) = self.pid {
            self.system.refresh_process(pid);
        }
    }

    fn read_mem(&mut self) -> MemStats {
        let mut stats = MemStats::default();
        if let Some(process) = self.pid.and_then(|pid| self.system.process(pid)) {
            stats.resident = process.memory();
            stats.virtual_mem = process.virtual_memory();
        }

        read_heap(&mut stats);

        let history = pauses::history();
        stats.num_gc = history.cycles;
        stats.last_gc = history.last_ns;
        stats.pause_total_ns = history.total_ns;
        stats.pause_ns = history.pauses;
        stats
    }

    fn process(&self) -> ProcessStats {
        let Some(process) = self.pid.and_then(|pid| self.system.process(pid)) else {
            return ProcessStats::default();
        };
        ProcessStats {
            threads: process.tasks().map_or(1, |tasks| tasks.len().max(1) as u64),
            cpu: f64::from(process.cpu_usage()),
        }
    }
}
