//! Prediction metrics.
//!
//! Instruments are OpenTelemetry counters and a histogram. Each service owns
//! its own meter provider, read by a Prometheus exporter whose registry backs
//! `GET /metrics`.

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::error::{OcrError, Result};

const REQUESTS: &str = "predict_requests";
const FAILURES: &str = "predict_failures";
const INFERENCE_TIME: &str = "inference_time";

pub struct InferenceMetrics {
    registry: Registry,
    // Dropping the provider shuts the reader down
    _provider: SdkMeterProvider,
    requests: Counter<u64>,
    failures: Counter<u64>,
    inference_time: Histogram<f64>,
}

impl InferenceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .without_scope_info()
            .without_target_info()
            .build()
            .map_err(|e| OcrError::Metrics(format!("failed to build exporter: {}", e)))?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("ocrgate");

        Ok(Self {
            requests: meter
                .u64_counter(REQUESTS)
                .with_description("Prediction requests received")
                .build(),
            failures: meter
                .u64_counter(FAILURES)
                .with_description("Prediction requests that failed")
                .build(),
            inference_time: meter
                .f64_histogram(INFERENCE_TIME)
                .with_description("Time taken for inference")
                .with_unit("s")
                .build(),
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self) {
        self.requests.add(1, &[]);
    }

    pub fn record_failure(&self) {
        self.failures.add(1, &[]);
    }

    /// Observe the duration of one model invocation
    pub fn observe_inference(&self, elapsed: Duration) {
        self.inference_time.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn requests(&self) -> u64 {
        self.counter_value(REQUESTS)
    }

    pub fn failures(&self) -> u64 {
        self.counter_value(FAILURES)
    }

    pub fn inferences(&self) -> u64 {
        self.family(INFERENCE_TIME)
            .and_then(|f| f.get_metric().first().map(|m| m.get_histogram().get_sample_count()))
            .unwrap_or(0)
    }

    /// Current values in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| OcrError::Metrics(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| OcrError::Metrics(e.to_string()))
    }

    /// Instruments only show up once they have been recorded to
    fn family(&self, prefix: &str) -> Option<MetricFamily> {
        self.registry
            .gather()
            .into_iter()
            .find(|f| f.get_name().starts_with(prefix))
    }

    fn counter_value(&self, prefix: &str) -> u64 {
        self.family(prefix)
            .and_then(|f| f.get_metric().first().map(|m| m.get_counter().get_value() as u64))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_before_any_request() {
        let metrics = InferenceMetrics::new().unwrap();
        assert_eq!(metrics.requests(), 0);
        assert_eq!(metrics.failures(), 0);
        assert_eq!(metrics.inferences(), 0);
    }

    #[test]
    fn test_record_and_render() {
        let metrics = InferenceMetrics::new().unwrap();
        metrics.record_request();
        metrics.record_request();
        metrics.record_failure();
        metrics.observe_inference(Duration::from_millis(1500));

        assert_eq!(metrics.requests(), 2);
        assert_eq!(metrics.failures(), 1);
        assert_eq!(metrics.inferences(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("# TYPE predict_requests_total counter"));
        assert!(text.contains("predict_requests_total 2"));
        assert!(text.contains("predict_failures_total 1"));
        assert!(text.contains("# TYPE inference_time_seconds histogram"));
        assert!(text.contains("inference_time_seconds_sum 1.5"));
        assert!(text.contains("inference_time_seconds_count 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = InferenceMetrics::new().unwrap();
        let b = InferenceMetrics::new().unwrap();
        a.record_request();
        assert_eq!(a.requests(), 1);
        assert_eq!(b.requests(), 0);
    }
}
