//! Process-wide Metrics Registry Facade
//!
//! The active [`Registry`] lives behind an `ArcSwap`. Until one is installed
//! (see [`crate::Rucksack`]) the facade holds an inert registry whose
//! instruments work but are never reported.
//!
//! ```rust,ignore
//! use rucksack::met;
//!
//! met::counter("requests", &["route:/pay"]).inc();
//! met::timer("db.query", &[]).time(|| run_query());
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MET_NAME` / `APP_NAME` | unset | Metric prefix; unset disables reporting |
//! | `MET_TAGS` / `APP_TAGS` | `` | Default tags (`k1:v1,flag`) |
//! | `MET_REPORT_INTERVAL` | `30s` | Flush interval |
//! | `MET_RUNTIME` | unset | Runtime stats families |
//! | `MET_DATADOG` | unset | DogStatsD agent address |

pub mod datadog;
mod instruments;
mod registry;
mod reporter;
pub mod runtime;

pub use instruments::{Counter, Distribution, Gauge, Rate, Reservoir, Timer, RESERVOIR_SIZE};
pub use registry::{Flusher, Registry, RegistryConfig, DEFAULT_INTERVAL};
pub use reporter::{
    MetricType, NoopReporter, RecordedMetric, RecordingReporter, ReportError, Reporter,
};

use arc_swap::ArcSwap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static CURRENT: LazyLock<ArcSwap<Registry>> =
    LazyLock::new(|| ArcSwap::from_pointee(Registry::inert()));

/// The active registry
pub fn current() -> Arc<Registry> {
    CURRENT.load_full()
}

/// Installs `registry`, returning the previous one
pub fn replace(registry: Registry) -> Arc<Registry> {
    CURRENT.swap(Arc::new(registry))
}

pub fn counter(name: &str, tags: &[&str]) -> Arc<Counter> {
    current().counter(name, tags)
}

pub fn gauge(name: &str, tags: &[&str]) -> Arc<Gauge> {
    current().gauge(name, tags)
}

pub fn rate_per_sec(name: &str, tags: &[&str]) -> Arc<Rate> {
    current().rate_per_sec(name, tags)
}

pub fn rate_per_min(name: &str, tags: &[&str]) -> Arc<Rate> {
    current().rate_per_min(name, tags)
}

pub fn rate_scale(name: &str, tags: &[&str], unit: Duration) -> Arc<Rate> {
    current().rate_scale(name, tags, unit)
}

pub fn reservoir(name: &str, tags: &[&str]) -> Arc<Reservoir> {
    current().reservoir(name, tags)
}

pub fn timer(name: &str, tags: &[&str]) -> Arc<Timer> {
    current().timer(name, tags)
}

pub fn subscribe(reporter: impl Reporter + 'static) {
    current().subscribe(reporter)
}

pub fn add_tags(tags: &[&str]) {
    current().add_tags(tags)
}

pub fn hostname() -> String {
    current().hostname().to_string()
}
