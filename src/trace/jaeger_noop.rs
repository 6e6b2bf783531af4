//! Tracer stubs used when the `jaeger` feature is disabled

use super::{TraceError, TracerConfig};
use crate::log::LayerFactory;

#[inline(always)]
pub fn init(_config: &TracerConfig) -> Result<LayerFactory, TraceError> {
    Err(TraceError::Disabled)
}

#[inline(always)]
pub fn shutdown() {}
