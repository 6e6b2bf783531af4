//! Kafka Log Forwarder
//!
//! A [`Hook`] that publishes every entry at or above a minimum level to a
//! Kafka topic. Publishing never blocks the logging call: the producer queues
//! the message and drops it when the queue is full.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `LOG_KAFKA_ADDRS` | Comma separated broker list (required) |
//! | `LOG_KAFKA_TOPIC` | Target topic (required) |
//! | `LOG_KAFKA_LEVEL` | Minimum level, default `info` |
//! | `LOG_KAFKA_TAGS` | Extra `key:value` fields; `key:` or `key:-` removes a default |

#[cfg(feature = "kafka")]
mod producer;

#[cfg(feature = "kafka")]
pub use producer::{connect, KafkaProducer};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Entry, Formatter, Hook, HookError, JsonFormatter, Level};
use crate::env;
use crate::error::ConfigError;
use crate::tags::{parse_tags, Value};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka forwarding settings
#[derive(Debug, Clone, PartialEq)]
pub struct KafkaConfig {
    pub addrs: Vec<String>,
    pub topic: String,
    pub level: Level,
    pub tags: BTreeMap<String, String>,
}

impl KafkaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env::system, std::process::id())
    }

    pub fn from_lookup<F>(env: F, pid: u32) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addrs = env::first(&env, &["LOG_KAFKA_ADDRS"])
            .map(|s| parse_tags(&s))
            .filter(|addrs| !addrs.is_empty())
            .ok_or(ConfigError::Missing("LOG_KAFKA_ADDRS"))?;
        let topic =
            env::first(&env, &["LOG_KAFKA_TOPIC"]).ok_or(ConfigError::Missing("LOG_KAFKA_TOPIC"))?;
        let level = match env::first(&env, &["LOG_KAFKA_LEVEL"]).map(|s| s.parse::<Level>()) {
            Some(Ok(level)) => level,
            Some(Err(err)) => {
                crate::warn!(error = %err, "invalid LOG_KAFKA_LEVEL, forwarding from info");
                Level::Info
            }
            None => Level::Info,
        };

        Ok(KafkaConfig {
            addrs,
            topic,
            level,
            tags: build_tags(&env, pid),
        })
    }
}

/// Static fields attached to every forwarded entry.
///
/// Starts from `host`, `port` and `pid`, then applies `LOG_KAFKA_TAGS`.
pub fn build_tags<F>(env: F, pid: u32) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut tags = BTreeMap::new();

    let host = env::hostname(env("HOST").as_deref());
    if !host.is_empty() {
        tags.insert("host".to_string(), host);
    }
    if let Some(port) = env::first(&env, &["PORT"]) {
        tags.insert("port".to_string(), port);
    }
    if pid != 0 {
        tags.insert("pid".to_string(), pid.to_string());
    }

    let extra = env::first(&env, &["LOG_KAFKA_TAGS"]).unwrap_or_default();
    for tag in parse_tags(&extra) {
        let Some((key, value)) = tag.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            continue;
        }
        match value {
            "" | "-" => {
                tags.remove(key);
            }
            _ => {
                tags.insert(key.to_string(), value.to_string());
            }
        }
    }
    tags
}

/// Every level at least as severe as `min`
pub fn levels_from(min: Level) -> Vec<Level> {
    Level::ALL.into_iter().filter(|&l| min.enables(l)).collect()
}

/// Error returned by a [`Producer`]
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("producer queue is full")]
    QueueFull,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Asynchronous message publisher
pub trait Producer: Send + Sync {
    /// Queues `payload` for delivery without blocking
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProducerError>;

    /// Waits up to `timeout` for queued messages to be delivered
    fn flush(&self, timeout: Duration) -> Result<(), ProducerError>;

    fn close(&self) -> Result<(), ProducerError>;
}

/// Hook forwarding formatted entries to a [`Producer`]
pub struct Forwarder<P> {
    producer: P,
    topic: String,
    levels: Vec<Level>,
    tags: BTreeMap<String, String>,
    formatter: Arc<dyn Formatter>,
}

impl<P: Producer> Forwarder<P> {
    pub fn new(producer: P, config: &KafkaConfig) -> Self {
        Forwarder {
            producer,
            topic: config.topic.clone(),
            levels: levels_from(config.level),
            tags: config.tags.clone(),
            formatter: Arc::new(JsonFormatter),
        }
    }

    /// Formats forwarded entries with `formatter` instead of JSON
    pub fn with_formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Arc::new(formatter);
        self
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }
}

impl<P: Producer> Hook for Forwarder<P> {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, entry: &Entry) -> Result<(), HookError> {
        let mut entry = entry.clone();
        for (key, value) in &self.tags {
            entry
                .fields
                .entry(key.clone())
                .or_insert_with(|| Value::Str(value.clone()));
        }

        let mut payload = self.formatter.format(&entry)?;
        while payload.last().is_some_and(u8::is_ascii_whitespace) {
            payload.pop();
        }

        // fire and forget, a full queue drops the entry
        let _ = self.producer.publish(&self.topic, payload);
        Ok(())
    }

    fn flush(&self) -> Result<(), HookError> {
        Ok(self.producer.flush(FLUSH_TIMEOUT)?)
    }

    fn close(&self) -> Result<(), HookError> {
        self.producer.flush(FLUSH_TIMEOUT)?;
        Ok(self.producer.close()?)
    }
}
