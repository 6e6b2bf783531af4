//! Context
//!
//! [`Rucksack`] owns the logger, registry, flush thread and tracer built from
//! the environment, installs them into the process-wide facades and tears
//! them down once on [`Rucksack::close`] or drop.
//!
//! ```rust,ignore
//! fn main() {
//!     let rucksack = rucksack::Rucksack::init();
//!     rucksack::info!("ready");
//!     // flushes metrics, closes log hooks and stops tracing
//!     drop(rucksack);
//! }
//! ```

use crate::env;
use crate::log::{self, Logger, LoggerConfig};
use crate::met::datadog::DatadogConfig;
use crate::met::runtime::{RuntimeLevels, RuntimeReporter};
use crate::met::{self, Flusher, Registry, RegistryConfig};
use crate::trace::{self, TracerConfig};

/// Active logger, registry and tracer of the process
pub struct Rucksack {
    logger: Logger,
    registry: Registry,
    flusher: Option<Flusher>,
    tracing: bool,
    closed: bool,
}

impl Rucksack {
    /// Loads `.env`, builds everything from the environment and installs
    /// the logger and registry into the global facades
    pub fn init() -> Self {
        let dotenv = dotenvy::dotenv();
        let rucksack = Self::from_lookup(env::system, std::process::id());
        rucksack.install();
        if let Ok(path) = dotenv {
            crate::debug!(path = %path.display(), "loaded environment file");
        }
        rucksack
    }

    /// Builds a context without touching the global facades
    pub fn from_lookup<F>(env: F, pid: u32) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut logger = Logger::new(LoggerConfig::from_lookup(&env));

        let mut tracing = false;
        if let Some(config) = TracerConfig::from_lookup(&env) {
            match trace::init(&config) {
                Ok(layer) => {
                    logger = logger.with_layer(layer);
                    tracing = true;
                }
                Err(err) => logger.in_scope(|| {
                    ::tracing::error!(error = %err, service = %config.service_name, "tracing disabled")
                }),
            }
        }

        attach_kafka(&logger, &env, pid);

        let registry = RegistryConfig::from_lookup(&env).map_or_else(Registry::inert, Registry::new);
        if registry.is_enabled() {
            if let Some(config) = DatadogConfig::from_lookup(&env) {
                attach_datadog(&logger, &registry, &config);
            }
            if let Some(levels) = RuntimeLevels::from_lookup(&env) {
                registry.subscribe(RuntimeReporter::new(levels));
            }
        }
        let flusher = registry.is_enabled().then(|| registry.start());

        Rucksack {
            logger,
            registry,
            flusher,
            tracing,
            closed: false,
        }
    }

    /// Makes this context's logger and registry the process-wide ones
    pub fn install(&self) {
        log::replace(self.logger.clone());
        met::replace(self.registry.clone());
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    /// Stops the flush thread after a final report, closes the logger and
    /// shuts the tracer down. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(flusher) = self.flusher.take() {
            flusher.stop();
        }
        if let Err(err) = self.logger.close() {
            eprintln!("rucksack: failed to close logger: {}", err);
        }
        if self.tracing {
            trace::shutdown();
        }
    }
}

impl Drop for Rucksack {
    fn drop(&mut self) {
        self.close();
    }
}

fn kafka_requested<F>(env: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    env::first(env, &["LOG_KAFKA_ADDRS", "LOG_KAFKA_TOPIC"]).is_some()
}

#[cfg(feature = "kafka")]
fn attach_kafka<F>(logger: &Logger, env: &F, pid: u32)
where
    F: Fn(&str) -> Option<String>,
{
    use crate::log::kafka::{self, KafkaConfig};
    use std::sync::Arc;

    if !kafka_requested(env) {
        return;
    }
    let config = match KafkaConfig::from_lookup(env, pid) {
        Ok(config) => config,
        Err(err) => {
            logger.in_scope(|| ::tracing::error!(error = %err, "kafka log forwarding disabled"));
            return;
        }
    };
    match kafka::connect(&config) {
        Ok(forwarder) => logger.add_hook(Arc::new(forwarder)),
        Err(err) => logger.in_scope(|| {
            ::tracing::error!(error = %err, topic = %config.topic, "failed to connect kafka producer")
        }),
    }
}

#[cfg(not(feature = "kafka"))]
fn attach_kafka<F>(logger: &Logger, env: &F, _pid: u32)
where
    F: Fn(&str) -> Option<String>,
{
    if kafka_requested(env) {
        logger.warn("kafka log forwarding is not compiled in, enable the `kafka` feature");
    }
}

#[cfg(feature = "datadog")]
fn attach_datadog(_logger: &Logger, registry: &Registry, config: &DatadogConfig) {
    registry.subscribe(met::datadog::DatadogReporter::new(config, registry.hostname()));
}

#[cfg(not(feature = "datadog"))]
fn attach_datadog(logger: &Logger, _registry: &Registry, config: &DatadogConfig) {
    logger.in_scope(|| {
        ::tracing::warn!(target = %config, "datadog reporting is not compiled in, enable the `datadog` feature")
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Level;
    use crate::met::RecordingReporter;
    use std::sync::Arc;

    #[test]
    fn test_from_lookup_without_config_is_inert() {
        let mut rucksack = Rucksack::from_lookup(env::mock(&[]), 1);
        assert!(!rucksack.registry().is_enabled());
        assert!(!rucksack.is_tracing());
        assert_eq!(rucksack.logger().level(), Level::Info);
        assert!(rucksack.flusher.is_none());
        rucksack.close();
    }

    #[test]
    fn test_from_lookup_builds_registry_and_logger() {
        let mut rucksack = Rucksack::from_lookup(
            env::mock(&[
                ("LOG_NAME", "billing"),
                ("LOG_LEVEL", "warn"),
                ("MET_NAME", "billing"),
                ("MET_RUNTIME", "mem"),
                ("MET_REPORT_INTERVAL", "1h"),
                ("HOST", "web-1"),
            ]),
            1,
        );
        assert_eq!(rucksack.logger().name(), Some("billing"));
        assert_eq!(rucksack.logger().level(), Level::Warn);
        assert!(rucksack.registry().is_enabled());
        assert_eq!(rucksack.registry().prefix(), "billing.");
        assert!(rucksack.flusher.is_some());

        let recorder = Arc::new(RecordingReporter::new());
        rucksack.registry().subscribe(recorder.clone());
        rucksack.close();

        // final report on close includes the runtime gauges
        assert_eq!(recorder.flush_count(), 1);
        assert_eq!(recorder.get_by_name("billing.runtime.threads").len(), 1);
        assert_eq!(recorder.get_by_name("billing.runtime.mem.resident").len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut rucksack =
            Rucksack::from_lookup(env::mock(&[("APP_NAME", "app"), ("MET_REPORT_INTERVAL", "1h")]), 1);
        let recorder = Arc::new(RecordingReporter::new());
        rucksack.registry().subscribe(recorder.clone());

        rucksack.close();
        rucksack.close();
        drop(rucksack);
        assert_eq!(recorder.flush_count(), 1);
    }
}
