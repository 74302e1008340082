use std::{collections::HashMap, sync::Arc};

use metrics::{Counter, Gauge, Histogram, Metrics};
use parking_lot::RwLock;
use prometheus::{Encoder, TextEncoder};

#[derive(Clone, Debug)]
pub struct TimeboostCounter(prometheus::Counter);

impl Counter for TimeboostCounter {
    fn add(&self, amount: usize) {
        self.0.inc_by(amount as f64);
    }
}

impl TimeboostCounter {
    pub fn new(registry: &prometheus::Registry, opts: prometheus::Opts) -> Self {
        let counter = prometheus::Counter::with_opts(opts).expect("failed to create counter");
        registry
            .register(Box::new(counter.clone()))
            .expect("failed to register counter");
        Self(counter)
    }
}

#[derive(Clone, Debug)]
pub struct TimeboostHistogram(prometheus::Histogram);

impl Histogram for TimeboostHistogram {
    fn add_point(&self, point: f64) {
        self.0.observe(point);
    }
}

impl TimeboostHistogram {
    pub fn new(registry: &prometheus::Registry, opts: prometheus::Opts) -> Self {
        let histogram =
            prometheus::Histogram::with_opts(opts.into()).expect("failed to create histogram");
        registry
            .register(Box::new(histogram.clone()))
            .expect("failed to register histogram");
        Self(histogram)
    }
}

#[derive(Clone, Debug)]
pub struct TimeboostGauge(prometheus::Gauge);

impl Gauge for TimeboostGauge {
    fn set(&self, amount: usize) {
        self.0.set(amount as f64);
    }

    fn update(&self, delta: i64) {
        self.0.add(delta as f64);
    }
}

impl TimeboostGauge {
    pub fn new(registry: &prometheus::Registry, opts: prometheus::Opts) -> Self {
        let gauge = prometheus::Gauge::with_opts(opts).expect("failed to create gauge");
        registry
            .register(Box::new(gauge.clone()))
            .expect("failed to register gauge");
        Self(gauge)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("prometheus export failed: {0}")]
pub struct PrometheusError(#[source] anyhow::Error);

impl From<prometheus::Error> for PrometheusError {
    fn from(source: prometheus::Error) -> Self {
        Self(anyhow::anyhow!(source))
    }
}

/// A `Metrics` implementation backed by a prometheus registry.
///
/// Instruments are registered under their name, so creating the same name
/// twice returns the already registered instrument.
#[derive(Clone, Debug, Default)]
pub struct PrometheusMetrics {
    registry: prometheus::Registry,
    histograms: Arc<RwLock<HashMap<String, TimeboostHistogram>>>,
    gauges: Arc<RwLock<HashMap<String, TimeboostGauge>>>,
    counters: Arc<RwLock<HashMap<String, TimeboostCounter>>>,
}

impl PrometheusMetrics {
    fn metric_opts(&self, name: &str, unit_label: Option<&str>) -> prometheus::Opts {
        let help = unit_label.unwrap_or(name);
        prometheus::Opts::new(name, help)
    }

    /// Render all registered metrics in the prometheus text format.
    pub fn export(&self) -> Result<String, PrometheusError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| {
            PrometheusError(anyhow::anyhow!(
                "could not convert Prometheus output to UTF-8: {}",
                err
            ))
        })
    }
}

impl Metrics for PrometheusMetrics {
    fn create_counter(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Counter> {
        if let Some(c) = self.counters.read().get(name) {
            return Box::new(c.clone());
        }
        let opts = self.metric_opts(name, unit_label);
        let counter = TimeboostCounter::new(&self.registry, opts);
        self.counters
            .write()
            .insert(name.to_string(), counter.clone());
        Box::new(counter)
    }

    fn create_gauge(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Gauge> {
        if let Some(g) = self.gauges.read().get(name) {
            return Box::new(g.clone());
        }
        let opts = self.metric_opts(name, unit_label);
        let gauge = TimeboostGauge::new(&self.registry, opts);
        self.gauges.write().insert(name.to_string(), gauge.clone());
        Box::new(gauge)
    }

    fn create_histogram(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Histogram> {
        if let Some(h) = self.histograms.read().get(name) {
            return Box::new(h.clone());
        }
        let opts = self.metric_opts(name, unit_label);
        let histogram = TimeboostHistogram::new(&self.registry, opts);
        self.histograms
            .write()
            .insert(name.to_string(), histogram.clone());
        Box::new(histogram)
    }
}

#[cfg(test)]
mod tests {
    use metrics::Metrics;

    use super::PrometheusMetrics;

    #[test]
    fn export_contains_registered_metrics() {
        let m = PrometheusMetrics::default();
        let c = m.create_counter("bids_accepted", None);
        c.add(3);
        let g = m.create_gauge("round", None);
        g.set(7);
        let _ = m.create_counter("bids_accepted", None);
        let out = m.export().unwrap();
        assert!(out.contains("bids_accepted 3"));
        assert!(out.contains("round 7"));
    }
}
