//! 12-factor wrappers for logging, metrics and tracing.
//!
//! Everything is configured from environment variables and exposed through
//! small process-wide facades over swappable instances:
//!
//! - [`log`]: leveled, structured logging on top of `tracing`
//! - [`met`]: counters, gauges, rates and timers flushed to reporters
//! - [`trace`]: Jaeger tracer bootstrap
//!
//! [`Rucksack`] ties them together and owns their lifetime.

pub mod env;
pub mod error;
pub mod log;
pub mod met;
pub mod tags;
pub mod trace;

mod context;

pub use context::Rucksack;
pub use error::ConfigError;
pub use tags::{parse_fields, parse_tags, Fields, Value};

#[doc(hidden)]
pub mod __private {
    pub use tracing;
}
