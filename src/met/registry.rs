//! Metric Registry
//!
//! Owns every instrument handed out under an application name and drives the
//! report cycle: prep reporters, snapshot instruments, deliver, flush.

use crossbeam::channel::{self, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Counter, Distribution, Gauge, Rate, Reporter, Reservoir, Timer};
use crate::env;
use crate::tags::parse_tags;

/// Report interval used when none (or zero) is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Registry settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub name: String,
    pub hostname: String,
    pub port: Option<String>,
    pub tags: Vec<String>,
    pub interval: Duration,
}

impl RegistryConfig {
    /// Reads `MET_NAME`/`APP_NAME`, `MET_TAGS`/`APP_TAGS`, `MET_REPORT_INTERVAL`,
    /// `HOST` and `PORT`. Returns `None` when no application name is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env::system)
    }

    pub fn from_lookup<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = env::first(&env, &["MET_NAME", "APP_NAME"])?;
        let interval = env::first(&env, &["MET_REPORT_INTERVAL"])
            .and_then(|s| env::parse_duration(&s))
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_INTERVAL);
        let tags = env::first(&env, &["MET_TAGS", "APP_TAGS"])
            .map(|s| parse_tags(&s))
            .unwrap_or_default();

        Some(RegistryConfig {
            name,
            hostname: env::hostname(env("HOST").as_deref()),
            port: env::first(&env, &["PORT"]),
            tags,
            interval,
        })
    }

    /// `host:<hostname>`, `port:<port>`, then the configured tags
    pub fn default_tags(&self) -> Vec<String> {
        let mut tags = Vec::with_capacity(self.tags.len() + 2);
        if !self.hostname.is_empty() {
            tags.push(format!("host:{}", self.hostname));
        }
        if let Some(port) = &self.port {
            tags.push(format!("port:{}", port));
        }
        tags.extend(self.tags.iter().cloned());
        tags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    name: String,
    tags: Vec<String>,
}

impl Key {
    fn new(name: &str, tags: &[&str]) -> Self {
        let mut tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        tags.sort();
        Key {
            name: name.to_string(),
            tags,
        }
    }
}

enum Snapshot {
    Discrete(f64),
    Sample(Distribution),
}

#[derive(Default)]
struct Instruments {
    counters: RwLock<HashMap<Key, Arc<Counter>>>,
    gauges: RwLock<HashMap<Key, Arc<Gauge>>>,
    rates: RwLock<HashMap<(Key, Duration), Arc<Rate>>>,
    reservoirs: RwLock<HashMap<Key, Arc<Reservoir>>>,
    timers: RwLock<HashMap<Key, Arc<Timer>>>,
}

impl Instruments {
    fn snapshot(&self) -> Vec<(Key, Snapshot)> {
        let mut out = Vec::new();
        for (key, c) in self.counters.read().iter() {
            out.push((key.clone(), Snapshot::Discrete(c.snapshot())));
        }
        for (key, g) in self.gauges.read().iter() {
            out.push((key.clone(), Snapshot::Discrete(g.value())));
        }
        for ((key, _), r) in self.rates.read().iter() {
            out.push((key.clone(), Snapshot::Discrete(r.snapshot())));
        }
        for (key, r) in self.reservoirs.read().iter() {
            out.push((key.clone(), Snapshot::Sample(r.snapshot())));
        }
        for (key, t) in self.timers.read().iter() {
            out.push((key.clone(), Snapshot::Sample(t.snapshot())));
        }
        out
    }
}

fn lookup<K, T>(map: &RwLock<HashMap<K, Arc<T>>>, key: K, make: impl FnOnce() -> T) -> Arc<T>
where
    K: Hash + Eq,
{
    if let Some(found) = map.read().get(&key) {
        return found.clone();
    }
    map.write().entry(key).or_insert_with(|| Arc::new(make())).clone()
}

struct Inner {
    prefix: String,
    enabled: bool,
    interval: Duration,
    hostname: String,
    tags: RwLock<Vec<String>>,
    instruments: Instruments,
    reporters: RwLock<Vec<Arc<dyn Reporter>>>,
}

/// A named collection of instruments and the reporters they are sent to
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("prefix", &self.inner.prefix)
            .field("enabled", &self.inner.enabled)
            .field("interval", &self.inner.interval)
            .finish()
    }
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        let tags = config.default_tags();
        Registry {
            inner: Arc::new(Inner {
                prefix: format!("{}.", config.name),
                enabled: true,
                interval: config.interval,
                hostname: config.hostname,
                tags: RwLock::new(tags),
                instruments: Instruments::default(),
                reporters: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Builds a registry from the environment, inert when no name is set
    pub fn from_env() -> Self {
        RegistryConfig::from_env().map_or_else(Self::inert, Self::new)
    }

    /// A registry whose instruments are never stored or reported
    pub fn inert() -> Self {
        Registry {
            inner: Arc::new(Inner {
                prefix: String::new(),
                enabled: false,
                interval: DEFAULT_INTERVAL,
                hostname: env::hostname(None),
                tags: RwLock::new(Vec::new()),
                instruments: Instruments::default(),
                reporters: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Name prefix including the trailing `.`
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// Tags prepended to every reported metric
    pub fn tags(&self) -> Vec<String> {
        self.inner.tags.read().clone()
    }

    pub fn add_tags(&self, tags: &[&str]) {
        self.inner
            .tags
            .write()
            .extend(tags.iter().map(|t| t.to_string()));
    }

    pub fn subscribe(&self, reporter: impl Reporter + 'static) {
        if self.inner.enabled {
            self.inner.reporters.write().push(Arc::new(reporter));
        }
    }

    pub fn counter(&self, name: &str, tags: &[&str]) -> Arc<Counter> {
        if !self.inner.enabled {
            return Arc::default();
        }
        lookup(&self.inner.instruments.counters, Key::new(name, tags), Counter::default)
    }

    pub fn gauge(&self, name: &str, tags: &[&str]) -> Arc<Gauge> {
        if !self.inner.enabled {
            return Arc::default();
        }
        lookup(&self.inner.instruments.gauges, Key::new(name, tags), Gauge::default)
    }

    pub fn rate_per_sec(&self, name: &str, tags: &[&str]) -> Arc<Rate> {
        self.rate_scale(name, tags, Duration::from_secs(1))
    }

    pub fn rate_per_min(&self, name: &str, tags: &[&str]) -> Arc<Rate> {
        self.rate_scale(name, tags, Duration::from_secs(60))
    }

    /// A rate reported per `unit`
    pub fn rate_scale(&self, name: &str, tags: &[&str], unit: Duration) -> Arc<Rate> {
        if !self.inner.enabled {
            return Arc::new(Rate::new(unit));
        }
        lookup(&self.inner.instruments.rates, (Key::new(name, tags), unit), || Rate::new(unit))
    }

    pub fn reservoir(&self, name: &str, tags: &[&str]) -> Arc<Reservoir> {
        if !self.inner.enabled {
            return Arc::default();
        }
        lookup(&self.inner.instruments.reservoirs, Key::new(name, tags), Reservoir::default)
    }

    pub fn timer(&self, name: &str, tags: &[&str]) -> Arc<Timer> {
        if !self.inner.enabled {
            return Arc::default();
        }
        lookup(&self.inner.instruments.timers, Key::new(name, tags), Timer::default)
    }

    /// Runs one report cycle on every subscribed reporter
    pub fn report(&self) {
        if !self.inner.enabled {
            return;
        }
        let reporters = self.inner.reporters.read().clone();

        for reporter in &reporters {
            if let Err(err) = reporter.prep(self) {
                crate::warn!(error = %err, "metrics reporter failed to prepare");
            }
        }

        let default_tags = self.tags();
        for (key, snapshot) in self.inner.instruments.snapshot() {
            if let Snapshot::Sample(dist) = &snapshot {
                if dist.is_empty() {
                    continue;
                }
            }

            let name = format!("{}{}", self.inner.prefix, key.name);
            let tags: Vec<String> = default_tags.iter().cloned().chain(key.tags).collect();
            for reporter in &reporters {
                let result = match &snapshot {
                    Snapshot::Discrete(value) => reporter.discrete(&name, &tags, *value),
                    Snapshot::Sample(dist) => reporter.sample(&name, &tags, dist),
                };
                if let Err(err) = result {
                    crate::warn!(error = %err, metric = %name, "metrics reporter failed to report");
                }
            }
        }

        for reporter in &reporters {
            if let Err(err) = reporter.flush() {
                crate::warn!(error = %err, "metrics reporter failed to flush");
            }
        }
    }

    /// Starts a background thread reporting every interval
    pub fn start(&self) -> Flusher {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(self.inner.interval);
        let registry = self.clone();

        let spawned = thread::Builder::new()
            .name("rucksack-flush".into())
            .spawn(move || loop {
                let stopped = channel::select! {
                    recv(ticker) -> _ => false,
                    recv(stop_rx) -> _ => true,
                };
                if stopped {
                    break;
                }
                registry.report();
            });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                crate::error!(error = %err, "failed to start metrics flush thread");
                None
            }
        };

        Flusher {
            registry: self.clone(),
            stop: Some(stop_tx),
            handle,
        }
    }
}

/// Handle to the background flush thread.
///
/// Stopping (or dropping) it ends the thread and runs one final report.
pub struct Flusher {
    registry: Registry,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        drop(stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                crate::error!("metrics flush thread panicked");
            }
        }
        self.registry.report();
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
