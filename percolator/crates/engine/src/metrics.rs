use anyhow::Result;
use core_types::config::MetricsSection;
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder, opts};

/// Counters and histograms for one engine.
pub struct EngineMetrics {
    pub registry: Registry,
    pub registrations_total: IntCounter,
    pub removals_total: IntCounter,
    pub documents_tested_total: IntCounter,
    pub matches_total: IntCounter,
    pub reindex_passes_total: IntCounter,
    pub test_latency: Histogram,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub registrations: u64,
    pub removals: u64,
    pub documents_tested: u64,
    pub matches: u64,
    pub reindex_passes: u64,
}

impl EngineMetrics {
    pub fn new(cfg: &MetricsSection) -> Result<Self> {
        let registry = Registry::new();

        let registrations_total = IntCounter::with_opts(opts!(
            "percolator_registrations_total",
            "Filters newly registered"
        ))?;
        let removals_total =
            IntCounter::with_opts(opts!("percolator_removals_total", "Filters removed"))?;
        let documents_tested_total = IntCounter::with_opts(opts!(
            "percolator_documents_tested_total",
            "Documents tested against registered filters"
        ))?;
        let matches_total = IntCounter::with_opts(opts!(
            "percolator_matches_total",
            "Filter ids returned by document tests"
        ))?;
        let reindex_passes_total = IntCounter::with_opts(opts!(
            "percolator_reindex_passes_total",
            "Namespace compactions"
        ))?;
        let mut hist_opts = HistogramOpts::new(
            "percolator_test_latency_seconds",
            "Document test latency in seconds",
        );
        if !cfg.test_latency_buckets.is_empty() {
            hist_opts = hist_opts.buckets(cfg.test_latency_buckets.clone());
        }
        let test_latency = Histogram::with_opts(hist_opts)?;

        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(removals_total.clone()))?;
        registry.register(Box::new(documents_tested_total.clone()))?;
        registry.register(Box::new(matches_total.clone()))?;
        registry.register(Box::new(reindex_passes_total.clone()))?;
        registry.register(Box::new(test_latency.clone()))?;

        Ok(Self {
            registry,
            registrations_total,
            removals_total,
            documents_tested_total,
            matches_total,
            reindex_passes_total,
            test_latency,
        })
    }

    /// Record one document test, its match count and latency (seconds).
    pub fn record_test(&self, matches: usize, latency_secs: f64) {
        self.documents_tested_total.inc();
        self.matches_total.inc_by(matches as u64);
        self.test_latency.observe(latency_secs);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            registrations: self.registrations_total.get(),
            removals: self.removals_total.get(),
            documents_tested: self.documents_tested_total.get(),
            matches: self.matches_total.get(),
            reindex_passes: self.reindex_passes_total.get(),
        }
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

/// Encode all metrics in Prometheus text format.
pub fn scrape(metrics: &EngineMetrics) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let metric_families = metrics.registry.gather();
    ENCODER.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_latency_and_matches() {
        let metrics = EngineMetrics::new(&MetricsSection::default()).unwrap();
        metrics.record_test(3, 0.000_2);
        metrics.record_test(0, 0.000_1);
        let snap = metrics.snapshot();
        assert_eq!(snap.documents_tested, 2);
        assert_eq!(snap.matches, 3);
        assert_eq!(metrics.test_latency.get_sample_count(), 2);
    }

    #[test]
    fn scrape_renders_text_format() {
        let metrics = EngineMetrics::new(&MetricsSection::default()).unwrap();
        metrics.registrations_total.inc();
        let text = String::from_utf8(scrape(&metrics).unwrap()).unwrap();
        assert!(text.contains("percolator_registrations_total 1"));
        assert!(text.contains("percolator_test_latency_seconds_bucket"));
    }

    #[test]
    fn empty_bucket_list_uses_prometheus_defaults() {
        let cfg = MetricsSection {
            enabled: true,
            test_latency_buckets: Vec::new(),
        };
        assert!(EngineMetrics::new(&cfg).is_ok());
    }
}
