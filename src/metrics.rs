//! Resource metrics: low-cardinality Prometheus counters,
//! gauges and histograms, exposed as `text/plain; version=0.0.4` at
//! `/metrics`. No label may encode status code, full path, tile
//! coordinates, endpoint kind, or issuer fingerprint.
//!
//! `prometheus` is the corpus's metrics crate of choice (estuary-flow's
//! `metrics` crate, nix-community/harmonia), used here the plain way: a
//! private `Registry`, one struct of named collectors, `encode` on request.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub log_list_requests_total: IntCounter,
    pub log_list_duration_seconds: prometheus::Histogram,

    pub log_requests_total: IntCounterVec,
    pub log_duration_seconds: HistogramVec,

    pub discovered_logs: IntGauge,
    pub discovered_zip_parts: IntGauge,
    pub open_zips: IntGauge,
    pub entry_cache_bytes: IntGauge,
    pub entry_cache_items: IntGauge,

    pub zip_cache_evictions_total: IntCounter,
    pub entry_cache_hits_total: IntCounter,
    pub entry_cache_misses_total: IntCounter,
    pub entry_cache_evictions_total: IntCounter,
    pub integrity_passed_total: IntCounter,
    pub integrity_failed_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let log_list_requests_total =
            IntCounter::new("ct_archive_log_list_requests_total", "logs.v3.json requests")
                .unwrap();
        let log_list_duration_seconds = prometheus::Histogram::with_opts(HistogramOpts::new(
            "ct_archive_log_list_duration_seconds",
            "logs.v3.json request duration",
        ))
        .unwrap();

        let log_requests_total = IntCounterVec::new(
            prometheus::Opts::new("ct_archive_log_requests_total", "per-log requests"),
            &["log"],
        )
        .unwrap();
        let log_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ct_archive_log_duration_seconds",
                "per-log request duration",
            ),
            &["log"],
        )
        .unwrap();

        let discovered_logs =
            IntGauge::new("ct_archive_discovered_logs", "logs currently discovered").unwrap();
        let discovered_zip_parts = IntGauge::new(
            "ct_archive_discovered_zip_parts",
            "zip parts currently discovered",
        )
        .unwrap();
        let open_zips =
            IntGauge::new("ct_archive_open_zips", "zip readers currently cached open").unwrap();
        let entry_cache_bytes = IntGauge::new(
            "ct_archive_entry_cache_bytes",
            "bytes currently held in the entry-content cache",
        )
        .unwrap();
        let entry_cache_items = IntGauge::new(
            "ct_archive_entry_cache_items",
            "items currently held in the entry-content cache",
        )
        .unwrap();

        let zip_cache_evictions_total = IntCounter::new(
            "ct_archive_zip_cache_evictions_total",
            "zip-part cache evictions",
        )
        .unwrap();
        let entry_cache_hits_total =
            IntCounter::new("ct_archive_entry_cache_hits_total", "entry cache hits").unwrap();
        let entry_cache_misses_total =
            IntCounter::new("ct_archive_entry_cache_misses_total", "entry cache misses").unwrap();
        let entry_cache_evictions_total = IntCounter::new(
            "ct_archive_entry_cache_evictions_total",
            "entry cache evictions",
        )
        .unwrap();
        let integrity_passed_total = IntCounter::new(
            "ct_archive_integrity_passed_total",
            "zip integrity verifications that passed",
        )
        .unwrap();
        let integrity_failed_total = IntCounter::new(
            "ct_archive_integrity_failed_total",
            "zip integrity verifications that failed",
        )
        .unwrap();

        for c in [&log_list_requests_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        registry
            .register(Box::new(log_list_duration_seconds.clone()))
            .unwrap();
        registry
            .register(Box::new(log_requests_total.clone()))
            .unwrap();
        registry
            .register(Box::new(log_duration_seconds.clone()))
            .unwrap();
        registry.register(Box::new(discovered_logs.clone())).unwrap();
        registry
            .register(Box::new(discovered_zip_parts.clone()))
            .unwrap();
        registry.register(Box::new(open_zips.clone())).unwrap();
        registry
            .register(Box::new(entry_cache_bytes.clone()))
            .unwrap();
        registry
            .register(Box::new(entry_cache_items.clone()))
            .unwrap();
        registry
            .register(Box::new(zip_cache_evictions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(entry_cache_hits_total.clone()))
            .unwrap();
        registry
            .register(Box::new(entry_cache_misses_total.clone()))
            .unwrap();
        registry
            .register(Box::new(entry_cache_evictions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(integrity_passed_total.clone()))
            .unwrap();
        registry
            .register(Box::new(integrity_failed_total.clone()))
            .unwrap();

        Self {
            registry,
            log_list_requests_total,
            log_list_duration_seconds,
            log_requests_total,
            log_duration_seconds,
            discovered_logs,
            discovered_zip_parts,
            open_zips,
            entry_cache_bytes,
            entry_cache_items,
            zip_cache_evictions_total,
            entry_cache_hits_total,
            entry_cache_misses_total,
            entry_cache_evictions_total,
            integrity_passed_total,
            integrity_failed_total,
        }
    }

    /// Renders the current state of every collector in Prometheus text
    /// exposition format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
