//! Tracer Bootstrap
//!
//! Resolves the Jaeger collector from the environment and installs a global
//! OpenTelemetry tracer provider. The returned [`LayerFactory`] plugs the
//! tracer into a [`Logger`](crate::log::Logger) so spans created while
//! logging are exported.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `TRACE_NAME` / `APP_NAME` | Service name (required) |
//! | `TRACE_JAEGER` | Jaeger agent host (required) |

use crate::env;

// Feature-gated Jaeger integration
#[cfg(feature = "jaeger")]
#[path = "jaeger.rs"]
mod backend;

#[cfg(not(feature = "jaeger"))]
#[path = "jaeger_noop.rs"]
mod backend;

pub use backend::{init, shutdown};

const SAMPLING_PORT: u16 = 5778;
const AGENT_PORT: u16 = 6831;

/// Jaeger collector settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerConfig {
    pub service_name: String,
    pub host: String,
}

impl TracerConfig {
    /// `None` unless both a service name and a collector host are set
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(env::system)
    }

    pub fn from_lookup<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Some(TracerConfig {
            service_name: env::first(&env, &["TRACE_NAME", "APP_NAME"])?,
            host: env::first(&env, &["TRACE_JAEGER"])?,
        })
    }

    /// Remote sampling strategy endpoint
    pub fn sampling_url(&self) -> String {
        format!("http://{}:{}/sampling", self.host, SAMPLING_PORT)
    }

    /// UDP agent endpoint spans are sent to
    pub fn agent_endpoint(&self) -> String {
        format!("{}:{}", self.host, AGENT_PORT)
    }
}

/// Error raised while installing the tracer
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("tracing is not compiled in, enable the `jaeger` feature")]
    Disabled,
    #[error("no tokio runtime to export spans on: {0}")]
    NoRuntime(String),
    #[error("failed to initialize tracer: {0}")]
    Init(String),
}
