//! Metric Reporters
//!
//! A reporter receives one snapshot of every instrument per report cycle.
//! Transports (Datadog), process samplers (runtime) and the in-memory
//! recorder used in tests all implement the same trait.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Distribution, Registry};

/// Error returned by a reporter
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Sink for periodic metric snapshots
pub trait Reporter: Send + Sync {
    /// Called at the start of every cycle, before instruments are snapshot
    fn prep(&self, _registry: &Registry) -> Result<(), ReportError> {
        Ok(())
    }

    /// Reports a single value (counter, gauge, rate)
    fn discrete(&self, name: &str, tags: &[String], value: f64) -> Result<(), ReportError>;

    /// Reports a reservoir or timer distribution
    fn sample(&self, name: &str, tags: &[String], dist: &Distribution) -> Result<(), ReportError>;

    /// Called once every snapshot of the cycle has been delivered
    fn flush(&self) -> Result<(), ReportError> {
        Ok(())
    }
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn prep(&self, registry: &Registry) -> Result<(), ReportError> {
        (**self).prep(registry)
    }

    fn discrete(&self, name: &str, tags: &[String], value: f64) -> Result<(), ReportError> {
        (**self).discrete(name, tags, value)
    }

    fn sample(&self, name: &str, tags: &[String], dist: &Distribution) -> Result<(), ReportError> {
        (**self).sample(name, tags, dist)
    }

    fn flush(&self) -> Result<(), ReportError> {
        (**self).flush()
    }
}

/// Reporter that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    #[inline]
    fn discrete(&self, _name: &str, _tags: &[String], _value: f64) -> Result<(), ReportError> {
        Ok(())
    }

    #[inline]
    fn sample(&self, _name: &str, _tags: &[String], _dist: &Distribution) -> Result<(), ReportError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Discrete,
    Sample,
}

/// A snapshot captured by [`RecordingReporter`]
#[derive(Debug, Clone)]
pub struct RecordedMetric {
    pub name: String,
    pub tags: Vec<String>,
    pub metric_type: MetricType,
    /// The discrete value, or the sample count
    pub value: f64,
    pub dist: Option<Distribution>,
}

/// In-memory reporter for tests and simulation
#[derive(Default)]
pub struct RecordingReporter {
    recorded: Mutex<Vec<RecordedMetric>>,
    flushes: AtomicU64,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded metrics
    pub fn get_recorded(&self) -> Vec<RecordedMetric> {
        self.recorded.lock().clone()
    }

    /// Get metrics by name
    pub fn get_by_name(&self, name: &str) -> Vec<RecordedMetric> {
        self.recorded
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Number of completed report cycles
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.recorded.lock().clear();
        self.flushes.store(0, Ordering::SeqCst);
    }

    /// Whether a metric with this name and type was reported
    pub fn assert_metric(&self, name: &str, metric_type: MetricType) -> bool {
        self.recorded
            .lock()
            .iter()
            .any(|m| m.name == name && m.metric_type == metric_type)
    }
}

impl Reporter for RecordingReporter {
    fn discrete(&self, name: &str, tags: &[String], value: f64) -> Result<(), ReportError> {
        self.recorded.lock().push(RecordedMetric {
            name: name.to_string(),
            tags: tags.to_vec(),
            metric_type: MetricType::Discrete,
            value,
            dist: None,
        });
        Ok(())
    }

    fn sample(&self, name: &str, tags: &[String], dist: &Distribution) -> Result<(), ReportError> {
        self.recorded.lock().push(RecordedMetric {
            name: name.to_string(),
            tags: tags.to_vec(),
            metric_type: MetricType::Sample,
            value: dist.count() as f64,
            dist: Some(dist.clone()),
        });
        Ok(())
    }

    fn flush(&self) -> Result<(), ReportError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_records() {
        let reporter = RecordingReporter::new();
        let tags = vec!["host:web-1".to_string()];

        reporter.discrete("app.requests", &tags, 3.0).unwrap();
        reporter
            .sample("app.latency", &[], &Distribution::new(vec![1.0, 2.0]))
            .unwrap();
        reporter.flush().unwrap();

        assert_eq!(reporter.get_recorded().len(), 2);
        assert!(reporter.assert_metric("app.requests", MetricType::Discrete));
        assert!(reporter.assert_metric("app.latency", MetricType::Sample));
        assert!(!reporter.assert_metric("app.latency", MetricType::Discrete));
        assert_eq!(reporter.get_by_name("app.latency")[0].value, 2.0);
        assert_eq!(reporter.get_by_name("app.requests")[0].tags, tags);
        assert_eq!(reporter.flush_count(), 1);
    }

    #[test]
    fn test_clear() {
        let reporter = RecordingReporter::new();
        reporter.discrete("x", &[], 1.0).unwrap();
        reporter.flush().unwrap();

        reporter.clear();
        assert!(reporter.get_recorded().is_empty());
        assert_eq!(reporter.flush_count(), 0);
    }

    #[test]
    fn test_shared_reporter_delegates() {
        let inner = Arc::new(RecordingReporter::new());
        let shared: Arc<dyn Reporter> = inner.clone();
        shared.discrete("x", &[], 1.0).unwrap();
        Reporter::flush(&shared).unwrap();

        assert_eq!(inner.get_recorded().len(), 1);
        assert_eq!(inner.flush_count(), 1);
        assert!(NoopReporter.discrete("x", &[], 1.0).is_ok());
    }
}
