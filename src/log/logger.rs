//! Logger Instances
//!
//! A [`Logger`] is an immutable bundle of name, level and base fields plus a
//! `tracing` dispatcher that routes events through the entry layer. Changing
//! anything means deriving a new logger; the output, the formatter and the
//! hook list are shared between a logger and everything derived from it.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use super::{Entry, Formatter, Hook, HookError, JsonFormatter, Level, LineWriter, TextFormatter};
use crate::env;
use crate::tags::{parse_fields, Fields, Value};

/// An extra layer stacked directly on the logger's registry
pub type BoxLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Builds a fresh [`BoxLayer`] for every derived logger
pub type LayerFactory = Arc<dyn Fn() -> BoxLayer + Send + Sync>;

/// Field carrying panic/fatal severity on tracing ERROR events
pub(crate) const SEVERITY_FIELD: &str = "rucksack.severity";

/// Logger settings resolved from the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoggerConfig {
    pub name: Option<String>,
    pub level: Level,
    pub fields: Fields,
}

impl LoggerConfig {
    /// Reads `LOG_NAME`, `LOG_LEVEL` and `LOG_FIELDS`/`LOG_TAGS`
    pub fn from_env() -> Self {
        Self::from_lookup(env::system)
    }

    pub fn from_lookup<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = env::first(&env, &["LOG_NAME"]);
        let level = env::first(&env, &["LOG_LEVEL"])
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let fields = env::first(&env, &["LOG_FIELDS", "LOG_TAGS"])
            .and_then(|s| parse_fields(&s))
            .unwrap_or_default();

        LoggerConfig {
            name,
            level,
            fields,
        }
    }
}

type Output = Box<dyn Write + Send>;
type HookList = Arc<RwLock<Vec<Arc<dyn Hook>>>>;

#[derive(Clone)]
struct Sink {
    output: Arc<Mutex<Output>>,
    formatter: Arc<dyn Formatter>,
    hooks: HookList,
}

impl Sink {
    fn emit(&self, entry: &Entry) {
        let hooks = self.hooks.read().clone();
        for hook in hooks.iter().filter(|h| h.levels().contains(&entry.level)) {
            if let Err(err) = hook.fire(entry) {
                eprintln!("rucksack: failed to fire hook: {}", err);
            }
        }

        match self.formatter.format(entry) {
            Ok(line) => {
                if let Err(err) = self.output.lock().write_all(&line) {
                    eprintln!("rucksack: failed to write log entry: {}", err);
                }
            }
            Err(err) => eprintln!("rucksack: failed to format log entry: {}", err),
        }
    }
}

#[derive(Clone)]
struct Parts {
    name: Option<String>,
    level: Level,
    fields: Fields,
    sink: Sink,
    layers: Vec<LayerFactory>,
    silent: bool,
}

/// A swappable logger instance
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    parts: Parts,
    dispatch: Dispatch,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = &self.inner.parts;
        f.debug_struct("Logger")
            .field("name", &parts.name)
            .field("level", &parts.level)
            .field("fields", &parts.fields)
            .field("silent", &parts.silent)
            .finish()
    }
}

impl Logger {
    /// Creates a logger writing to stderr.
    ///
    /// Named or tagged loggers emit JSON lines, anonymous ones human
    /// readable text.
    pub fn new(config: LoggerConfig) -> Self {
        let formatter: Arc<dyn Formatter> = if config.name.is_none() && config.fields.is_empty() {
            Arc::new(TextFormatter)
        } else {
            Arc::new(JsonFormatter)
        };

        Self::from_parts(Parts {
            name: config.name,
            level: config.level,
            fields: config.fields,
            sink: Sink {
                output: Arc::new(Mutex::new(Box::new(io::stderr()))),
                formatter,
                hooks: HookList::default(),
            },
            layers: Vec::new(),
            silent: false,
        })
    }

    pub fn from_env() -> Self {
        Self::new(LoggerConfig::from_env())
    }

    /// A logger that discards everything
    pub fn silent() -> Self {
        Self::new(LoggerConfig::default()).silenced()
    }

    fn from_parts(parts: Parts) -> Self {
        let dispatch = if parts.silent {
            Dispatch::none()
        } else {
            // An empty layer vec votes `never` on every callsite, so leave it out
            let layers: Vec<BoxLayer> = parts.layers.iter().map(|make| make()).collect();
            let layers = (!layers.is_empty()).then_some(layers);
            let entries = EntryLayer {
                name: parts.name.clone(),
                level: parts.level,
                fields: parts.fields.clone(),
                sink: parts.sink.clone(),
            };
            Dispatch::new(
                tracing_subscriber::registry()
                    .with(layers)
                    .with(entries)
                    .with(parts.level.filter()),
            )
        };
        Logger {
            inner: Arc::new(Inner { parts, dispatch }),
        }
    }

    fn derive(&self, change: impl FnOnce(&mut Parts)) -> Self {
        let mut parts = self.inner.parts.clone();
        change(&mut parts);
        Self::from_parts(parts)
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.parts.name.as_deref()
    }

    pub fn level(&self) -> Level {
        self.inner.parts.level
    }

    pub fn fields(&self) -> &Fields {
        &self.inner.parts.fields
    }

    pub fn is_silent(&self) -> bool {
        self.inner.parts.silent
    }

    /// Child logger named `parent.name`
    pub fn named(&self, name: &str) -> Self {
        self.derive(|parts| {
            parts.name = Some(match parts.name.take() {
                Some(parent) => format!("{}.{}", parent, name),
                None => name.to_string(),
            });
        })
    }

    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.derive(|parts| {
            parts.fields.insert(key, value);
        })
    }

    pub fn with_fields(&self, fields: Fields) -> Self {
        self.derive(|parts| parts.fields.extend(fields))
    }

    pub fn with_level(&self, level: Level) -> Self {
        self.derive(|parts| parts.level = level)
    }

    /// Same output and hooks, different formatter
    pub fn with_formatter(&self, formatter: impl Formatter + 'static) -> Self {
        self.derive(|parts| parts.sink.formatter = Arc::new(formatter))
    }

    /// Same formatter and hooks, different output
    pub fn with_output(&self, output: impl Write + Send + 'static) -> Self {
        self.derive(|parts| parts.sink.output = Arc::new(Mutex::new(Box::new(output))))
    }

    /// Stacks an extra layer (e.g. OpenTelemetry) under the entry layer
    pub fn with_layer(&self, layer: LayerFactory) -> Self {
        self.derive(|parts| parts.layers.push(layer))
    }

    /// Same configuration and hooks, no output
    pub fn silenced(&self) -> Self {
        self.derive(|parts| parts.silent = true)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.inner.dispatch
    }

    /// Runs `f` with this logger as the default `tracing` dispatcher
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.inner.dispatch, f)
    }

    pub fn log(&self, level: Level, message: impl fmt::Display) {
        self.in_scope(|| match level {
            Level::Panic | Level::Fatal => {
                tracing::error!(rucksack.severity = level.as_str(), "{}", message)
            }
            Level::Error => tracing::error!("{}", message),
            Level::Warn => tracing::warn!("{}", message),
            Level::Info => tracing::info!("{}", message),
            Level::Debug => tracing::debug!("{}", message),
            Level::Trace => tracing::trace!("{}", message),
        })
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::Debug, message)
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::Info, message)
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::Warn, message)
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::Error, message)
    }

    /// Logs at FATAL, closes the logger and exits with status 1
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.log(Level::Fatal, message);
        super::exit(self, 1)
    }

    /// Logs at PANIC, then panics with the same message
    pub fn panic(&self, message: impl fmt::Display) -> ! {
        let message = message.to_string();
        self.log(Level::Panic, &message);
        panic!("{}", message)
    }

    /// An `io::Write` that logs every line it receives at `level`
    pub fn writer(&self, level: Level, fields: Fields) -> LineWriter {
        LineWriter::new(self.with_fields(fields), level)
    }

    /// Registers a hook on the shared hook list
    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.inner.parts.sink.hooks.write().push(hook);
    }

    /// Flushes the output and every hook
    pub fn sync(&self) -> Result<(), HookError> {
        let sink = &self.inner.parts.sink;
        let mut result = sink.output.lock().flush().map_err(HookError::from);
        let hooks = sink.hooks.read().clone();
        for hook in hooks {
            if let Err(err) = hook.flush() {
                result = Err(err);
            }
        }
        result
    }

    /// Flushes the output, then closes and detaches every hook
    pub fn close(&self) -> Result<(), HookError> {
        let sink = &self.inner.parts.sink;
        let mut result = sink.output.lock().flush().map_err(HookError::from);
        let hooks = std::mem::take(&mut *sink.hooks.write());
        for hook in hooks {
            if let Err(err) = hook.close() {
                result = Err(err);
            }
        }
        result
    }
}

/// Turns tracing events into entries and hands them to the sink
struct EntryLayer {
    name: Option<String>,
    level: Level,
    fields: Fields,
    sink: Sink,
}

impl<S: Subscriber> Layer<S> for EntryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EntryVisitor {
            message: String::new(),
            fields: self.fields.clone(),
            severity: None,
        };
        event.record(&mut visitor);

        let level = visitor
            .severity
            .unwrap_or_else(|| Level::from_tracing(*event.metadata().level()));
        if !self.level.enables(level) {
            return;
        }

        self.sink.emit(&Entry {
            time: Utc::now(),
            level,
            message: visitor.message,
            logger: self.name.clone(),
            fields: visitor.fields,
        });
    }
}

struct EntryVisitor {
    message: String,
    fields: Fields,
    severity: Option<Level>,
}

impl EntryVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for EntryVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            _ => self.insert(field, Value::Str(format!("{:?}", value))),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            SEVERITY_FIELD => self.severity = value.parse().ok(),
            _ => self.insert(field, Value::Str(value.to_string())),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let value = i64::try_from(value)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Str(value.to_string()));
        self.insert(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::error(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::testing::{RecordingHook, SharedBuf};

    fn json_logger(level: Level) -> (Logger, SharedBuf) {
        let buf = SharedBuf::default();
        let mut fields = Fields::new();
        fields.insert("app".into(), Value::Str("billing".into()));
        let logger = Logger::new(LoggerConfig {
            name: Some("api".into()),
            level,
            fields,
        })
        .with_output(buf.clone());
        (logger, buf)
    }

    #[test]
    fn test_config_from_lookup() {
        let config = LoggerConfig::from_lookup(env::mock(&[
            ("LOG_NAME", "worker"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FIELDS", ""),
            ("LOG_TAGS", "region:eu,shard:3"),
        ]));
        assert_eq!(config.name.as_deref(), Some("worker"));
        assert_eq!(config.level, Level::Debug);
        assert_eq!(config.fields["region"], Value::Str("eu".into()));
        assert_eq!(config.fields["shard"], Value::Int(3));
    }

    #[test]
    fn test_config_defaults() {
        let config = LoggerConfig::from_lookup(env::mock(&[("LOG_LEVEL", "chatty")]));
        assert_eq!(config, LoggerConfig::default());
    }

    #[test]
    fn test_json_output_carries_base_and_event_fields() {
        let (logger, buf) = json_logger(Level::Info);
        logger.in_scope(|| tracing::info!(user = 7, ok = true, "charged {}", "card"));

        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["msg"], "charged card");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["logger"], "api");
        assert_eq!(parsed["app"], "billing");
        assert_eq!(parsed["user"], 7);
        assert_eq!(parsed["ok"], true);
    }

    #[test]
    fn test_level_filtering() {
        let (logger, buf) = json_logger(Level::Warn);
        logger.info("hidden");
        logger.debug("hidden");
        logger.warn("shown");
        logger.error("shown");
        assert_eq!(buf.lines().len(), 2);
    }

    #[test]
    fn test_text_output_for_anonymous_logger() {
        let buf = SharedBuf::default();
        let logger = Logger::new(LoggerConfig::default()).with_output(buf.clone());
        logger.info("plain");
        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" INFO    plain"), "got {:?}", lines[0]);
    }

    #[test]
    fn test_hooks_fire_for_subscribed_levels() {
        let (logger, _buf) = json_logger(Level::Debug);
        let hook = Arc::new(RecordingHook::new(&[Level::Fatal, Level::Error]));
        logger.add_hook(hook.clone());

        logger.info("skip");
        logger.error("boom");
        logger.log(Level::Fatal, "down");

        let entries = hook.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Level::Error);
        assert_eq!(entries[0].message, "boom");
        assert_eq!(entries[0].fields["app"], Value::Str("billing".into()));
        assert_eq!(entries[1].level, Level::Fatal);
    }

    #[test]
    fn test_child_loggers_share_hooks() {
        let (logger, buf) = json_logger(Level::Info);
        let child = logger.with_field("request", "r-1").named("handler");

        let hook = Arc::new(RecordingHook::new(&Level::ALL));
        logger.add_hook(hook.clone());
        child.info("handled");

        let entries = hook.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].logger.as_deref(), Some("api.handler"));
        assert_eq!(entries[0].fields["request"], Value::Str("r-1".into()));

        let parsed: serde_json::Value = serde_json::from_str(&buf.lines()[0]).unwrap();
        assert_eq!(parsed["request"], "r-1");
    }

    #[test]
    fn test_silenced_logger_drops_output() {
        let (logger, buf) = json_logger(Level::Info);
        let hook = Arc::new(RecordingHook::new(&Level::ALL));
        logger.add_hook(hook.clone());

        let silent = logger.silenced();
        silent.error("nobody hears this");
        assert!(silent.is_silent());
        assert!(buf.lines().is_empty());
        assert!(hook.entries().is_empty());
    }

    #[test]
    fn test_close_detaches_hooks() {
        let (logger, _buf) = json_logger(Level::Info);
        let hook = Arc::new(RecordingHook::new(&Level::ALL));
        logger.add_hook(hook.clone());

        logger.sync().unwrap();
        assert_eq!(hook.flushes(), 1);

        logger.close().unwrap();
        assert!(hook.closed());
        logger.info("after close");
        assert!(hook.entries().is_empty());
    }

    #[test]
    fn test_record_error_values() {
        let (logger, _buf) = json_logger(Level::Info);
        let hook = Arc::new(RecordingHook::new(&Level::ALL));
        logger.add_hook(hook.clone());

        let err = io::Error::new(io::ErrorKind::Other, "disk gone");
        let source: &(dyn std::error::Error + 'static) = &err;
        logger.in_scope(|| tracing::error!(error = source, "write failed"));

        let entries = hook.entries();
        assert_eq!(entries[0].fields["error"], Value::Error("disk gone".into()));
    }

    #[test]
    fn test_logger_without_layers_reaches_output_and_hooks() {
        let buf = SharedBuf::default();
        let logger = Logger::new(LoggerConfig::default()).with_output(buf.clone());
        let hook = Arc::new(RecordingHook::new(&Level::ALL));
        logger.add_hook(hook.clone());

        logger.error("plain");

        assert_eq!(hook.entries().len(), 1);
        assert_eq!(hook.entries()[0].message, "plain");
        assert_eq!(buf.lines().len(), 1);
    }

    #[test]
    fn test_extra_layer_sees_events_alongside_entries() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(Arc<AtomicUsize>);

        impl<S: Subscriber> Layer<S> for Counting {
            fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let (logger, buf) = json_logger(Level::Info);
        let logger = logger.with_layer(Arc::new(move || -> BoxLayer {
            Box::new(Counting(counter.clone()))
        }));

        logger.warn("layered");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(buf.lines().len(), 1);
    }

    #[test]
    #[should_panic(expected = "invariant broken")]
    fn test_panic_logs_then_panics() {
        let (logger, _buf) = json_logger(Level::Info);
        logger.panic("invariant broken");
    }
}
