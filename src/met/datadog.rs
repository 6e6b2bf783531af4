//! Datadog Reporter
//!
//! `MET_DATADOG` selects the transport by shape. A `host:port` (or
//! `udp://host[:port]`) value names a DogStatsD agent reached over UDP; any
//! other value is an API key and snapshots are posted to the HTTP series
//! endpoint. Both degrade to a no-op if the transport cannot be created.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MET_DATADOG` | unset | API key, or agent address `host:port` / `udp://host[:port]` |
//! | `MET_DATADOG_DISABLE_COMPRESSION` | unset | Any value: no gzip (API) / one datagram per metric (agent) |

use std::fmt;

use crate::env;

const DEFAULT_AGENT_PORT: u16 = 8125;

/// Datadog series endpoint used with an API key
pub const SERIES_ENDPOINT: &str = "https://api.datadoghq.com/api/v1/series";

/// Where snapshots are sent
#[derive(Clone, PartialEq, Eq)]
pub enum DatadogConfig {
    /// DogStatsD agent over UDP
    Agent {
        /// Agent address including the port
        addr: String,
        /// Pack several metrics into each datagram
        batching: bool,
    },
    /// HTTP series API
    Api {
        api_key: String,
        /// Gzip request bodies
        compress: bool,
    },
}

impl DatadogConfig {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env::system)
    }

    /// `None` when `MET_DATADOG` is not set
    pub fn from_lookup<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = env::first(&env, &["MET_DATADOG"])?;
        let plain = env::first(&env, &["MET_DATADOG_DISABLE_COMPRESSION"]).is_none();

        let config = match agent_addr(&value) {
            Some(addr) => DatadogConfig::Agent {
                addr,
                batching: plain,
            },
            None => DatadogConfig::Api {
                api_key: value,
                compress: plain,
            },
        };
        Some(config)
    }
}

/// Keeps the API key out of logs
impl fmt::Debug for DatadogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatadogConfig::Agent { addr, batching } => f
                .debug_struct("Agent")
                .field("addr", addr)
                .field("batching", batching)
                .finish(),
            DatadogConfig::Api { compress, .. } => f
                .debug_struct("Api")
                .field("api_key", &"<redacted>")
                .field("compress", compress)
                .finish(),
        }
    }
}

impl fmt::Display for DatadogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatadogConfig::Agent { addr, .. } => write!(f, "agent {}", addr),
            DatadogConfig::Api { .. } => f.write_str(SERIES_ENDPOINT),
        }
    }
}

/// `Some(host:port)` when `value` is shaped like an agent address
fn agent_addr(value: &str) -> Option<String> {
    if let Some(rest) = value.strip_prefix("udp://") {
        return Some(if has_port(rest) {
            rest.to_string()
        } else {
            format!("{}:{}", rest, DEFAULT_AGENT_PORT)
        });
    }
    has_port(value).then(|| value.to_string())
}

fn has_port(value: &str) -> bool {
    value
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
}

#[cfg(feature = "datadog")]
pub use client::DatadogReporter;

#[cfg(feature = "datadog")]
mod client {
    use crossbeam::channel::{self, Sender, TrySendError};
    use dogstatsd::{BatchingOptions, Client, Options};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use parking_lot::Mutex;
    use serde::Serialize;
    use std::io::Write;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use super::{DatadogConfig, SERIES_ENDPOINT};
    use crate::met::{Distribution, ReportError, Reporter};

    const QUANTILES: [(&str, f64); 3] = [("p50", 0.50), ("p95", 0.95), ("p99", 0.99)];

    /// Request bodies waiting for the sender thread
    const PENDING_BODIES: usize = 16;

    /// Reporter wrapping a DogStatsD client or the HTTP series API, with
    /// graceful degradation
    pub struct DatadogReporter {
        transport: Transport,
    }

    enum Transport {
        Agent(Option<Client>),
        Api(Option<ApiSender>),
    }

    impl DatadogReporter {
        /// `hostname` is attached to every series sent through the API
        pub fn new(config: &DatadogConfig, hostname: &str) -> Self {
            let transport = match config {
                DatadogConfig::Agent { addr, batching } => Transport::Agent(agent(addr, *batching)),
                DatadogConfig::Api { api_key, compress } => Transport::Api(
                    ApiSender::spawn(SERIES_ENDPOINT, api_key, *compress, hostname),
                ),
            };
            DatadogReporter { transport }
        }

        pub fn is_connected(&self) -> bool {
            match &self.transport {
                Transport::Agent(client) => client.is_some(),
                Transport::Api(sender) => sender.is_some(),
            }
        }
    }

    fn agent(addr: &str, batching: bool) -> Option<Client> {
        let mut options = Options {
            to_addr: addr.to_string(),
            ..Default::default()
        };
        if batching {
            options.batching_options = Some(BatchingOptions {
                max_buffer_size: 8000,
                max_time: Duration::from_millis(500),
                max_retry_attempts: 3,
                initial_retry_delay: 10,
            });
        }

        match Client::new(options) {
            Ok(c) => {
                crate::info!(addr = %addr, "DogStatsD reporter connected");
                Some(c)
            }
            Err(e) => {
                crate::warn!(error = %e, "failed to create DogStatsD client, metrics disabled");
                None
            }
        }
    }

    fn transport(err: dogstatsd::DogstatsdError) -> ReportError {
        ReportError::Transport(err.to_string())
    }

    /// Summary values reported for a distribution, after its count
    fn summary(dist: &Distribution) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        [("min", dist.min()), ("max", dist.max()), ("mean", dist.mean())]
            .into_iter()
            .chain(QUANTILES.iter().map(move |&(suffix, q)| (suffix, dist.quantile(q))))
    }

    impl Reporter for DatadogReporter {
        fn discrete(&self, name: &str, tags: &[String], value: f64) -> Result<(), ReportError> {
            match &self.transport {
                Transport::Agent(Some(client)) => {
                    client.gauge(name, value.to_string(), tags).map_err(transport)
                }
                Transport::Api(Some(sender)) => {
                    sender.push(Series::new(name.to_string(), "gauge", value, tags));
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        fn sample(&self, name: &str, tags: &[String], dist: &Distribution) -> Result<(), ReportError> {
            match &self.transport {
                Transport::Agent(Some(client)) => {
                    client
                        .count(format!("{}.count", name), dist.count() as i64, tags)
                        .map_err(transport)?;
                    for (suffix, value) in summary(dist) {
                        client
                            .gauge(format!("{}.{}", name, suffix), value.to_string(), tags)
                            .map_err(transport)?;
                    }
                    Ok(())
                }
                Transport::Api(Some(sender)) => {
                    let count = Series::new(format!("{}.count", name), "count", dist.count() as f64, tags);
                    sender.push(count);
                    for (suffix, value) in summary(dist) {
                        sender.push(Series::new(format!("{}.{}", name, suffix), "gauge", value, tags));
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        fn flush(&self) -> Result<(), ReportError> {
            match &self.transport {
                Transport::Api(Some(sender)) => sender.flush(),
                _ => Ok(()),
            }
        }
    }

    #[derive(Debug, Serialize)]
    struct Series {
        metric: String,
        points: [(i64, f64); 1],
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(skip_serializing_if = "String::is_empty")]
        host: String,
        tags: Vec<String>,
    }

    impl Series {
        fn new(metric: String, kind: &'static str, value: f64, tags: &[String]) -> Self {
            Series {
                metric,
                points: [(chrono::Utc::now().timestamp(), value)],
                kind,
                host: String::new(),
                tags: tags.to_vec(),
            }
        }
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        series: &'a [Series],
    }

    /// JSON body for a batch of series, gzipped when `compress` is set
    fn encode(series: &[Series], compress: bool) -> Result<Vec<u8>, ReportError> {
        let json = serde_json::to_vec(&Payload { series })
            .map_err(|e| ReportError::Transport(e.to_string()))?;
        if !compress {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    /// Buffers one cycle of series and hands the encoded body to a sender
    /// thread, so report cycles never wait on the network
    struct ApiSender {
        hostname: String,
        compress: bool,
        buffer: Mutex<Vec<Series>>,
        tx: Option<Sender<Vec<u8>>>,
        worker: Option<JoinHandle<()>>,
    }

    impl ApiSender {
        fn spawn(endpoint: &str, api_key: &str, compress: bool, hostname: &str) -> Option<Self> {
            let (tx, rx) = channel::bounded::<Vec<u8>>(PENDING_BODIES);
            let endpoint = endpoint.to_string();
            let api_key = api_key.to_string();

            let worker = thread::Builder::new()
                .name("rucksack-datadog".into())
                .spawn(move || {
                    let http = match reqwest::blocking::Client::builder()
                        .timeout(Duration::from_secs(10))
                        .build()
                    {
                        Ok(http) => http,
                        Err(e) => {
                            crate::warn!(error = %e, "failed to create Datadog HTTP client, metrics disabled");
                            return;
                        }
                    };
                    for body in rx {
                        let mut request = http
                            .post(&endpoint)
                            .header("DD-API-KEY", &api_key)
                            .header("Content-Type", "application/json");
                        if compress {
                            request = request.header("Content-Encoding", "gzip");
                        }
                        match request.body(body).send() {
                            Ok(resp) if resp.status().is_success() => {}
                            Ok(resp) => crate::warn!(status = %resp.status(), "Datadog rejected metrics"),
                            Err(e) => crate::warn!(error = %e, "failed to send metrics to Datadog"),
                        }
                    }
                });

            match worker {
                Ok(worker) => {
                    crate::info!(endpoint = SERIES_ENDPOINT, compress, "Datadog API reporter started");
                    Some(ApiSender {
                        hostname: hostname.to_string(),
                        compress,
                        buffer: Mutex::new(Vec::new()),
                        tx: Some(tx),
                        worker: Some(worker),
                    })
                }
                Err(e) => {
                    crate::warn!(error = %e, "failed to start Datadog sender, metrics disabled");
                    None
                }
            }
        }

        fn push(&self, mut series: Series) {
            series.host.clone_from(&self.hostname);
            self.buffer.lock().push(series);
        }

        fn flush(&self) -> Result<(), ReportError> {
            let series = std::mem::take(&mut *self.buffer.lock());
            if series.is_empty() {
                return Ok(());
            }
            let body = encode(&series, self.compress)?;
            let Some(tx) = &self.tx else {
                return Ok(());
            };
            match tx.try_send(body) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    Err(ReportError::Transport("Datadog sender is backed up, dropped one cycle".into()))
                }
            }
        }
    }

    impl Drop for ApiSender {
        fn drop(&mut self) {
            // closing the channel lets the worker drain and exit
            self.tx.take();
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_address_shapes() {
        let config =
            DatadogConfig::from_lookup(env::mock(&[("MET_DATADOG", "10.0.0.5:9125")])).unwrap();
        assert_eq!(
            config,
            DatadogConfig::Agent {
                addr: "10.0.0.5:9125".into(),
                batching: true
            }
        );

        let config =
            DatadogConfig::from_lookup(env::mock(&[("MET_DATADOG", "udp://dd-agent")])).unwrap();
        assert_eq!(
            config,
            DatadogConfig::Agent {
                addr: "dd-agent:8125".into(),
                batching: true
            }
        );
    }

    #[test]
    fn test_token_is_an_api_key() {
        for token in ["mytoken", "0123456789abcdef0123456789abcdef", "dd-agent"] {
            let config = DatadogConfig::from_lookup(env::mock(&[("MET_DATADOG", token)])).unwrap();
            assert_eq!(
                config,
                DatadogConfig::Api {
                    api_key: token.into(),
                    compress: true
                },
                "{} should not be treated as an address",
                token
            );
        }
    }

    #[test]
    fn test_disable_compression() {
        let config = DatadogConfig::from_lookup(env::mock(&[
            ("MET_DATADOG", "mytoken"),
            ("MET_DATADOG_DISABLE_COMPRESSION", "yes"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            DatadogConfig::Api {
                api_key: "mytoken".into(),
                compress: false
            }
        );

        let config = DatadogConfig::from_lookup(env::mock(&[
            ("MET_DATADOG", "dd-agent:8125"),
            ("MET_DATADOG_DISABLE_COMPRESSION", "1"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            DatadogConfig::Agent {
                addr: "dd-agent:8125".into(),
                batching: false
            }
        );
    }

    #[test]
    fn test_api_key_is_redacted() {
        let config = DatadogConfig::Api {
            api_key: "secret-key".into(),
            compress: true,
        };
        assert!(!format!("{:?}", config).contains("secret-key"));
        assert!(!config.to_string().contains("secret-key"));
    }

    #[test]
    fn test_requires_value() {
        assert_eq!(DatadogConfig::from_lookup(env::mock(&[])), None);
    }

    #[cfg(feature = "datadog")]
    #[test]
    fn test_agent_reporter_sends_without_agent() {
        use crate::met::{Distribution, Reporter};

        let reporter = DatadogReporter::new(
            &DatadogConfig::Agent {
                addr: "127.0.0.1:8125".into(),
                batching: false,
            },
            "web-1",
        );
        let tags = vec!["env:test".to_string()];
        if reporter.is_connected() {
            // UDP send succeeds even with nothing listening
            assert!(reporter.discrete("app.queue", &tags, 3.0).is_ok());
            assert!(reporter
                .sample("app.latency", &tags, &Distribution::new(vec![1.0, 2.0]))
                .is_ok());
        }
    }
}
