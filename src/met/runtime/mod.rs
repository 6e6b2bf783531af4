//! Runtime Stats Reporter
//!
//! Samples process memory, allocator heap statistics and reclamation pauses
//! into the registry right before each report cycle. Families are selected
//! with `MET_RUNTIME` (`mem`, `heap`, `gc` or `all`, comma separated); thread
//! count and CPU usage are always reported.
//!
//! ```rust,ignore
//! let levels = RuntimeLevels::parse("mem,gc");
//! registry.subscribe(RuntimeReporter::new(levels));
//! ```

mod jemalloc;
pub mod pauses;
mod source;

pub use pauses::{new_pauses, reclaim, record_pause, PAUSE_RING_SIZE};
pub use source::{MemStats, ProcessStats, StatsSource, SystemStats};

use parking_lot::Mutex;
use std::time::Duration;

use super::{Distribution, Registry, ReportError, Reporter};
use crate::env;
use crate::tags::parse_tags;

/// Which statistics families are reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeLevels {
    pub mem: bool,
    pub heap: bool,
    pub gc: bool,
}

impl RuntimeLevels {
    /// `None` when `MET_RUNTIME` is not set
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env::system)
    }

    pub fn from_lookup<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        env::first(&env, &["MET_RUNTIME"]).map(|s| Self::parse(&s))
    }

    /// Unknown names are ignored
    pub fn parse(s: &str) -> Self {
        let mut levels = RuntimeLevels::default();
        for name in parse_tags(s) {
            match name.to_ascii_lowercase().as_str() {
                "mem" => levels.mem = true,
                "heap" => levels.heap = true,
                "gc" => levels.gc = true,
                "all" => {
                    levels = RuntimeLevels {
                        mem: true,
                        heap: true,
                        gc: true,
                    }
                }
                _ => {}
            }
        }
        levels
    }

    pub fn any(&self) -> bool {
        self.mem || self.heap || self.gc
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Previous {
    mallocs: u64,
    frees: u64,
    num_gc: u32,
}

struct State {
    source: Box<dyn StatsSource>,
    prev: Previous,
}

/// Reporter feeding runtime statistics into the registry during `prep`
pub struct RuntimeReporter {
    levels: RuntimeLevels,
    state: Mutex<State>,
}

impl RuntimeReporter {
    pub fn new(levels: RuntimeLevels) -> Self {
        Self::with_source(levels, SystemStats::new())
    }

    pub fn with_source(levels: RuntimeLevels, source: impl StatsSource + 'static) -> Self {
        RuntimeReporter {
            levels,
            state: Mutex::new(State {
                source: Box::new(source),
                prev: Previous::default(),
            }),
        }
    }

    pub fn levels(&self) -> RuntimeLevels {
        self.levels
    }

    fn report_mem(&self, registry: &Registry, stats: &MemStats, prev: &Previous) {
        registry.gauge("runtime.mem.resident", &[]).update(stats.resident as f64);
        registry.gauge("runtime.mem.virtual", &[]).update(stats.virtual_mem as f64);
        registry.gauge("runtime.mem.alloc", &[]).update(stats.allocated as f64);
        registry
            .rate_per_sec("runtime.mem.mallocs", &[])
            .update(stats.mallocs.saturating_sub(prev.mallocs) as f64);
        registry
            .rate_per_sec("runtime.mem.frees", &[])
            .update(stats.frees.saturating_sub(prev.frees) as f64);
    }

    fn report_heap(&self, registry: &Registry, stats: &MemStats) {
        let gauges = [
            ("runtime.heap.active", stats.heap_active),
            ("runtime.heap.resident", stats.heap_resident),
            ("runtime.heap.mapped", stats.heap_mapped),
            ("runtime.heap.retained", stats.heap_retained),
            ("runtime.heap.metadata", stats.heap_metadata),
            ("runtime.heap.objects", stats.heap_objects()),
        ];
        for (name, value) in gauges {
            registry.gauge(name, &[]).update(value as f64);
        }
    }

    fn report_gc(&self, registry: &Registry, stats: &MemStats, prev: &Previous) {
        registry
            .gauge("runtime.gc.last", &[])
            .update(stats.last_gc as f64 / 1e9);
        registry
            .rate_per_min("runtime.gc.num", &[])
            .update(stats.num_gc.wrapping_sub(prev.num_gc) as f64);

        let pause = registry.timer("runtime.gc.pause", &[]);
        for ns in new_pauses(&stats.pause_ns, prev.num_gc, stats.num_gc) {
            pause.update(Duration::from_nanos(ns));
        }
        registry
            .gauge("runtime.gc.pause.total", &[])
            .update(stats.pause_total_ns as f64 / 1e6);
    }
}

impl Reporter for RuntimeReporter {
    fn prep(&self, registry: &Registry) -> Result<(), ReportError> {
        let mut state = self.state.lock();
        state.source.refresh();

        if self.levels.any() {
            let source = &mut state.source;
            let stats = registry
                .timer("runtime.readstats", &[])
                .time(|| source.read_mem());
            let prev = state.prev;

            if self.levels.mem {
                self.report_mem(registry, &stats, &prev);
            }
            if self.levels.heap {
                self.report_heap(registry, &stats);
            }
            if self.levels.gc {
                self.report_gc(registry, &stats, &prev);
            }

            state.prev = Previous {
                mallocs: stats.mallocs,
                frees: stats.frees,
                num_gc: stats.num_gc,
            };
        }

        let process = state.source.process();
        registry.gauge("runtime.threads", &[]).update(process.threads as f64);
        registry.gauge("runtime.cpu", &[]).update(process.cpu);
        Ok(())
    }

    fn discrete(&self, _name: &str, _tags: &[String], _value: f64) -> Result<(), ReportError> {
        Ok(())
    }

    fn sample(&self, _name: &str, _tags: &[String], _dist: &Distribution) -> Result<(), ReportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::met::{MetricType, RecordingReporter, RegistryConfig};
    use std::sync::Arc;

    struct FixedSource {
        reads: Vec<MemStats>,
    }

    impl StatsSource for FixedSource {
        fn refresh(&mut self) {}

        fn read_mem(&mut self) -> MemStats {
            if self.reads.len() > 1 {
                self.reads.remove(0)
            } else {
                self.reads[0].clone()
            }
        }

        fn process(&self) -> ProcessStats {
            ProcessStats {
                threads: 4,
                cpu: 12.5,
            }
        }
    }

    fn registry() -> (Registry, Arc<RecordingReporter>) {
        let registry = Registry::new(RegistryConfig {
            name: "app".into(),
            hostname: String::new(),
            port: None,
            tags: Vec::new(),
            interval: Duration::from_secs(30),
        });
        let recorder = Arc::new(RecordingReporter::new());
        registry.subscribe(recorder.clone());
        (registry, recorder)
    }

    fn value(recorder: &RecordingReporter, name: &str) -> f64 {
        recorder.get_by_name(name).last().map(|m| m.value).unwrap_or(f64::NAN)
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(
            RuntimeLevels::parse("mem, gc"),
            RuntimeLevels {
                mem: true,
                heap: false,
                gc: true
            }
        );
        assert_eq!(
            RuntimeLevels::parse("ALL"),
            RuntimeLevels {
                mem: true,
                heap: true,
                gc: true
            }
        );
        assert!(!RuntimeLevels::parse("cpu,").any());
        assert_eq!(RuntimeLevels::from_lookup(crate::env::mock(&[])), None);
    }

    #[test]
    fn test_always_reports_threads_and_cpu() {
        let (registry, recorder) = registry();
        registry.subscribe(RuntimeReporter::with_source(
            RuntimeLevels::default(),
            FixedSource {
                reads: vec![MemStats::default()],
            },
        ));

        registry.report();
        assert_eq!(value(&recorder, "app.runtime.threads"), 4.0);
        assert_eq!(value(&recorder, "app.runtime.cpu"), 12.5);
        assert!(recorder.get_by_name("app.runtime.readstats").is_empty());
        assert!(recorder.get_by_name("app.runtime.mem.resident").is_empty());
    }

    #[test]
    fn test_mem_and_heap_families() {
        let (registry, recorder) = registry();
        let stats = MemStats {
            resident: 2048,
            virtual_mem: 4096,
            allocated: 1000,
            mallocs: 50,
            frees: 20,
            heap_active: 3000,
            ..Default::default()
        };
        registry.subscribe(RuntimeReporter::with_source(
            RuntimeLevels::parse("mem,heap"),
            FixedSource { reads: vec![stats] },
        ));

        registry.report();
        assert_eq!(value(&recorder, "app.runtime.mem.resident"), 2048.0);
        assert_eq!(value(&recorder, "app.runtime.mem.virtual"), 4096.0);
        assert_eq!(value(&recorder, "app.runtime.mem.alloc"), 1000.0);
        assert_eq!(value(&recorder, "app.runtime.heap.active"), 3000.0);
        assert_eq!(value(&recorder, "app.runtime.heap.objects"), 30.0);
        assert!(recorder.assert_metric("app.runtime.mem.mallocs", MetricType::Discrete));
        assert!(recorder.assert_metric("app.runtime.readstats", MetricType::Sample));
        assert!(recorder.get_by_name("app.runtime.gc.num").is_empty());
    }

    #[test]
    fn test_gc_pauses_drain_new_slots() {
        let (registry, recorder) = registry();
        let mut first = MemStats {
            num_gc: 2,
            pause_total_ns: 3_000_000,
            ..Default::default()
        };
        first.pause_ns[0] = 1_000_000;
        first.pause_ns[1] = 2_000_000;

        let mut second = first.clone();
        second.num_gc = 3;
        second.pause_ns[2] = 4_000_000;
        second.pause_total_ns = 7_000_000;

        registry.subscribe(RuntimeReporter::with_source(
            RuntimeLevels::parse("gc"),
            FixedSource {
                reads: vec![first, second],
            },
        ));

        registry.report();
        let pauses = recorder.get_by_name("app.runtime.gc.pause");
        assert_eq!(pauses.len(), 1);
        assert_eq!(pauses[0].dist.as_ref().map(|d| d.values().to_vec()), Some(vec![1.0, 2.0]));
        assert_eq!(value(&recorder, "app.runtime.gc.pause.total"), 3.0);

        registry.report();
        let pauses = recorder.get_by_name("app.runtime.gc.pause");
        assert_eq!(pauses.len(), 2);
        assert_eq!(pauses[1].dist.as_ref().map(|d| d.values().to_vec()), Some(vec![4.0]));
        assert_eq!(value(&recorder, "app.runtime.gc.pause.total"), 7.0);
    }
}
