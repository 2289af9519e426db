//! Prometheus metrics for the outbox and dispatcher.
//!
//! Names match the source system's `metrics.py` exactly so existing
//! dashboards and alerts keep working against this implementation.

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

pub struct Metrics {
    pub webhook_deliveries_total: IntCounterVec,
    pub webhook_delivery_duration_seconds: Histogram,
    pub events_published_total: IntCounterVec,
    pub http_requests_total: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> anyhow::Result<Self> {
        let webhook_deliveries_total = IntCounterVec::new(
            Opts::new("webhook_deliveries_total", "Webhook delivery attempts by outcome"),
            &["status"],
        )?;
        let webhook_delivery_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "webhook_delivery_duration_seconds",
            "Time spent performing a single webhook delivery attempt",
        ))?;
        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Events published to the outbox by type"),
            &["event_type"],
        )?;
        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Inbound API requests"),
            &["method", "path", "status_code"],
        )?;

        registry.register(Box::new(webhook_deliveries_total.clone()))?;
        registry.register(Box::new(webhook_delivery_duration_seconds.clone()))?;
        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(Self {
            webhook_deliveries_total,
            webhook_delivery_duration_seconds,
            events_published_total,
            http_requests_total,
        })
    }

    pub fn record_delivery(&self, status: &str, duration_seconds: f64) {
        self.webhook_deliveries_total.with_label_values(&[status]).inc();
        self.webhook_delivery_duration_seconds.observe(duration_seconds);
    }

    pub fn record_published(&self, event_type: &str) {
        self.events_published_total.with_label_values(&[event_type]).inc();
    }

    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16) {
        self.http_requests_total
            .with_label_values(&[method, path, &status_code.to_string()])
            .inc();
    }
}
