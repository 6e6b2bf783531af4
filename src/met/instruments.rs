//! Metric Instruments
//!
//! Handles returned by the registry. Callers mutate them directly; the
//! registry snapshots them once per report cycle.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum number of samples a reservoir keeps per interval
pub const RESERVOIR_SIZE: usize = 1028;

/// An f64 stored in an `AtomicU64`
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn take(&self) -> f64 {
        f64::from_bits(self.0.swap(0f64.to_bits(), Ordering::Relaxed))
    }
}

/// Sum of increments over the current interval
#[derive(Debug, Default)]
pub struct Counter(AtomicF64);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.0.add(1.0);
    }

    #[inline]
    pub fn update(&self, delta: f64) {
        self.0.add(delta);
    }

    /// Value accumulated since the last snapshot
    pub fn value(&self) -> f64 {
        self.0.load()
    }

    pub(crate) fn snapshot(&self) -> f64 {
        self.0.take()
    }
}

/// Last recorded value
#[derive(Debug, Default)]
pub struct Gauge(AtomicF64);

impl Gauge {
    #[inline]
    pub fn update(&self, value: f64) {
        self.0.store(value);
    }

    pub fn value(&self) -> f64 {
        self.0.load()
    }
}

/// Sum of increments scaled to a time unit
#[derive(Debug)]
pub struct Rate {
    sum: AtomicF64,
    since: Mutex<Instant>,
    unit: Duration,
}

impl Rate {
    pub(crate) fn new(unit: Duration) -> Self {
        Rate {
            sum: AtomicF64::default(),
            since: Mutex::new(Instant::now()),
            unit,
        }
    }

    #[inline]
    pub fn update(&self, delta: f64) {
        self.sum.add(delta);
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    pub(crate) fn snapshot(&self) -> f64 {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> f64 {
        let elapsed = {
            let mut since = self.since.lock();
            let elapsed = now.saturating_duration_since(*since);
            *since = now;
            elapsed
        };
        let sum = self.sum.take();
        if elapsed.is_zero() {
            return 0.0;
        }
        sum / elapsed.as_secs_f64() * self.unit.as_secs_f64()
    }
}

#[derive(Debug, Default)]
struct Samples {
    values: Vec<f64>,
    seen: u64,
}

/// Uniform random sample of the values seen this interval
#[derive(Debug, Default)]
pub struct Reservoir {
    samples: Mutex<Samples>,
}

impl Reservoir {
    pub fn update(&self, value: f64) {
        let mut samples = self.samples.lock();
        samples.seen += 1;
        if samples.values.len() < RESERVOIR_SIZE {
            samples.values.push(value);
        } else {
            let slot = rand::thread_rng().gen_range(0..samples.seen);
            if let Some(v) = samples.values.get_mut(slot as usize) {
                *v = value;
            }
        }
    }

    /// Number of updates since the last snapshot
    pub fn seen(&self) -> u64 {
        self.samples.lock().seen
    }

    pub(crate) fn snapshot(&self) -> Distribution {
        let samples = std::mem::take(&mut *self.samples.lock());
        Distribution::new(samples.values)
    }
}

/// A reservoir of durations in milliseconds
#[derive(Debug, Default)]
pub struct Timer(Reservoir);

impl Timer {
    pub fn update(&self, elapsed: Duration) {
        self.0.update(elapsed.as_secs_f64() * 1e3);
    }

    /// Records the time elapsed since `start`
    pub fn since(&self, start: Instant) {
        self.update(start.elapsed());
    }

    /// Runs `f` and records how long it took
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.since(start);
        result
    }

    pub(crate) fn snapshot(&self) -> Distribution {
        self.0.snapshot()
    }
}

/// Sorted snapshot of reservoir samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    values: Vec<f64>,
    sum: f64,
}

impl Distribution {
    pub fn new(mut values: Vec<f64>) -> Self {
        values.sort_by(f64::total_cmp);
        let sum = values.iter().sum();
        Distribution { values, sum }
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> f64 {
        self.values.first().copied().unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    /// Nearest-rank quantile, `q` in `0.0..=1.0`
    pub fn quantile(&self, q: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let rank = (q.clamp(0.0, 1.0) * self.values.len() as f64).ceil() as usize;
        self.values[rank.saturating_sub(1).min(self.values.len() - 1)]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}
