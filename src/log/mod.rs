//! Process-wide Logger Facade
//!
//! The active [`Logger`] lives behind an `ArcSwap` and is built lazily from
//! the environment (`LOG_NAME`, `LOG_LEVEL`, `LOG_FIELDS`/`LOG_TAGS`) on first
//! use. Readers always see a complete logger; `replace`, `silence`,
//! `set_formatter` and `set_output` swap in a whole new instance.
//!
//! ```rust,ignore
//! use rucksack::log;
//!
//! log::info("starting up");
//! rucksack::warn!(attempt = 3, "retrying {}", url);
//!
//! let child = log::with_field("request", "r-42");
//! child.info("handled");
//! ```

mod entry;
mod format;
pub mod gcloud;
mod hook;
pub mod kafka;
mod level;
mod logger;
mod recover;
mod writer;

pub use entry::Entry;
pub use format::{FormatError, Formatter, JsonFormatter, TextFormatter};
pub use hook::{Hook, HookError};
pub use level::{Level, ParseLevelError};
pub use logger::{BoxLayer, LayerFactory, Logger, LoggerConfig};
pub use recover::{error_on_panic, error_on_panic_with, fatal_on_panic, fatal_on_panic_with};
pub use writer::LineWriter;

use arc_swap::ArcSwap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, LazyLock};

use crate::tags::{Fields, Value};

static CURRENT: LazyLock<ArcSwap<Logger>> =
    LazyLock::new(|| ArcSwap::from_pointee(Logger::from_env()));

/// The active logger
pub fn current() -> Arc<Logger> {
    CURRENT.load_full()
}

/// Installs `logger`, returning the previous one
pub fn replace(logger: Logger) -> Arc<Logger> {
    CURRENT.swap(Arc::new(logger))
}

/// Swaps in a copy of the active logger that writes nothing
pub fn silence() {
    CURRENT.store(Arc::new(current().silenced()));
}

pub fn set_formatter(formatter: impl Formatter + 'static) {
    CURRENT.store(Arc::new(current().with_formatter(formatter)));
}

pub fn set_output(output: impl Write + Send + 'static) {
    CURRENT.store(Arc::new(current().with_output(output)));
}

/// Registers a hook on the active logger's shared hook list
pub fn add_hook(hook: Arc<dyn Hook>) {
    current().add_hook(hook);
}

/// A child of the active logger with one more base field
pub fn with_field(key: impl Into<String>, value: impl Into<Value>) -> Logger {
    current().with_field(key, value)
}

pub fn with_fields(fields: Fields) -> Logger {
    current().with_fields(fields)
}

pub fn debug(message: impl fmt::Display) {
    current().debug(message)
}

pub fn info(message: impl fmt::Display) {
    current().info(message)
}

/// Alias of [`info`]
pub fn print(message: impl fmt::Display) {
    current().info(message)
}

pub fn warn(message: impl fmt::Display) {
    current().warn(message)
}

pub fn error(message: impl fmt::Display) {
    current().error(message)
}

pub fn fatal(message: impl fmt::Display) -> ! {
    current().fatal(message)
}

pub fn panic(message: impl fmt::Display) -> ! {
    current().panic(message)
}

/// Flushes the active logger's output and hooks
pub fn sync() -> Result<(), HookError> {
    current().sync()
}

/// Flushes and detaches every hook of the active logger
pub fn close() -> Result<(), HookError> {
    current().close()
}

/// Closes `logger` and terminates the process with `code`
#[doc(hidden)]
pub fn exit(logger: &Logger, code: i32) -> ! {
    if let Err(err) = logger.close() {
        eprintln!("rucksack: failed to close logger: {}", err);
    }
    std::process::exit(code)
}

/// Logs a DEBUG event on the active logger using `tracing` syntax
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::log::current().in_scope(|| $crate::__private::tracing::debug!($($arg)+))
    };
}

/// Logs an INFO event on the active logger using `tracing` syntax
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::log::current().in_scope(|| $crate::__private::tracing::info!($($arg)+))
    };
}

/// Logs a WARN event on the active logger using `tracing` syntax
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::log::current().in_scope(|| $crate::__private::tracing::warn!($($arg)+))
    };
}

/// Logs an ERROR event on the active logger using `tracing` syntax
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::log::current().in_scope(|| $crate::__private::tracing::error!($($arg)+))
    };
}

/// Logs a FATAL event on the active logger, closes it and exits with status 1
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        let logger = $crate::log::current();
        logger.in_scope(|| {
            $crate::__private::tracing::error!(rucksack.severity = "fatal", $($arg)+)
        });
        $crate::log::exit(&logger, 1)
    }};
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Entry, Hook, HookError, Level};
    use parking_lot::Mutex;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Cloneable in-memory output
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl io::Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hook keeping every entry it sees
    pub(crate) struct RecordingHook {
        levels: Vec<Level>,
        entries: Mutex<Vec<Entry>>,
        flushes: AtomicUsize,
        closed: AtomicBool,
    }

    impl RecordingHook {
        pub(crate) fn new(levels: &[Level]) -> Self {
            RecordingHook {
                levels: levels.to_vec(),
                entries: Mutex::new(Vec::new()),
                flushes: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        }

        pub(crate) fn entries(&self) -> Vec<Entry> {
            self.entries.lock().clone()
        }

        pub(crate) fn flushes(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        pub(crate) fn closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Hook for RecordingHook {
        fn levels(&self) -> &[Level] {
            &self.levels
        }

        fn fire(&self, entry: &Entry) -> Result<(), HookError> {
            self.entries.lock().push(entry.clone());
            Ok(())
        }

        fn flush(&self) -> Result<(), HookError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) -> Result<(), HookError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
