//! Jaeger Tracer Setup
//!
//! Remote-sampled agent pipeline exporting batches on the ambient tokio
//! runtime.

use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::Sampler;
use std::sync::Arc;

use super::{TraceError, TracerConfig};
use crate::log::{BoxLayer, LayerFactory};

/// Installs the global tracer provider.
///
/// Must be called from within a tokio runtime. Returns a factory producing
/// the `tracing-opentelemetry` layer bound to the installed tracer.
pub fn init(config: &TracerConfig) -> Result<LayerFactory, TraceError> {
    tokio::runtime::Handle::try_current().map_err(|e| TraceError::NoRuntime(e.to_string()))?;

    let sampler = Sampler::jaeger_remote(
        Tokio,
        reqwest::Client::new(),
        Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
        config.service_name.clone(),
    )
    .with_endpoint(config.sampling_url())
    .build()
    .map_err(|e| TraceError::Init(e.to_string()))?;

    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_endpoint(config.agent_endpoint())
        .with_service_name(config.service_name.clone())
        .with_trace_config(opentelemetry_sdk::trace::Config::default().with_sampler(sampler))
        .install_batch(Tokio)
        .map_err(|e| TraceError::Init(e.to_string()))?;

    Ok(Arc::new(move || -> BoxLayer {
        Box::new(tracing_opentelemetry::layer().with_tracer(tracer.clone()))
    }))
}

/// Flushes pending spans and uninstalls the global provider
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
