use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use lateral_core::ProcessingStats;

/// Collectors for the lateral service. Shared behind an `Arc`.
pub struct Metrics {
    pub registry: Registry,
    /// Requests by outcome (`ok`, `bad_request`).
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: Histogram,
    pub laterals_emitted_total: IntCounter,
    pub taps_emitted_total: IntCounter,
    /// Records left out, by skip reason.
    pub records_skipped_total: IntCounterVec,
    pub geocode_failures_total: IntCounter,
    pub geocode_cache_entries: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("lateral_service".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            requests_total: reg!(IntCounterVec::new(
                Opts::new("requests_total", "Lateral derivation requests handled"),
                &["outcome"]
            )?),
            request_duration_seconds: reg!(Histogram::with_opts(
                HistogramOpts::new("request_duration_seconds", "Time to derive one batch")
                    .buckets(prometheus::exponential_buckets(0.005, 2.0, 14)?)
            )?),
            laterals_emitted_total: reg!(IntCounter::new(
                "laterals_emitted_total",
                "Lateral records emitted, promoted taps included"
            )?),
            taps_emitted_total: reg!(IntCounter::new("taps_emitted_total", "Tap records emitted")?),
            records_skipped_total: reg!(IntCounterVec::new(
                Opts::new("records_skipped_total", "Candidate records left out of the output"),
                &["reason"]
            )?),
            geocode_failures_total: reg!(IntCounter::new(
                "geocode_failures_total",
                "Reverse geocode calls that failed or timed out"
            )?),
            geocode_cache_entries: reg!(IntGauge::new(
                "geocode_cache_entries",
                "Coordinates with a cached address"
            )?),
            registry,
        })
    }

    pub fn observe_batch(&self, stats: &ProcessingStats) {
        self.laterals_emitted_total
            .inc_by((stats.processed_count + stats.promoted_tap_count) as u64);
        self.taps_emitted_total.inc_by(stats.tap_count as u64);
        self.geocode_failures_total.inc_by(stats.geocode_failures as u64);
        for (reason, n) in &stats.skipped_by_reason {
            self.records_skipped_total
                .with_label_values(&[reason.as_str()])
                .inc_by(*n as u64);
        }
    }

    /// Serves the registry on `/metrics`.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let mut buffer = Vec::new();
                    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                        tracing::error!(error = %e, "Failed to encode metrics");
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                    String::from_utf8_lossy(&buffer).into_owned().into_response()
                }
            }),
        )
    }
}
