//! Prometheus metrics exposition
//!
//! - `ibtikar_http_requests_total` (counter): labels `route`, `status`
//! - `ibtikar_request_duration_seconds` (histogram): label `route`
//! - `ibtikar_upstream_errors_total` (counter): labels `upstream`, `kind`
//! - `ibtikar_posts_ingested_total` (counter): label `label`
//! - `ibtikar_rate_limited_total` (counter): label `resource`
//! - `ibtikar_oauth_links_total` (counter)

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use analysis_store::LabelCounts;

const DURATION_METRIC: &str = "ibtikar_request_duration_seconds";

/// Preview requests wait on the feed provider and the classifier, so the
/// upper buckets go well past typical API latencies.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed HTTP request. `route` is the matched route template,
/// never the raw path, to keep label cardinality bounded.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "ibtikar_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route.to_string()).record(duration_secs);
}

pub fn record_upstream_error(upstream: &'static str, kind: &'static str) {
    metrics::counter!("ibtikar_upstream_errors_total", "upstream" => upstream, "kind" => kind)
        .increment(1);
}

pub fn record_ingested(counts: &LabelCounts) {
    for (label, n) in [
        ("harmful", counts.harmful),
        ("safe", counts.safe),
        ("unknown", counts.unknown),
    ] {
        if n > 0 {
            metrics::counter!("ibtikar_posts_ingested_total", "label" => label).increment(n);
        }
    }
}

pub fn record_rate_limited(resource: &str) {
    metrics::counter!("ibtikar_rate_limited_total", "resource" => resource.to_string())
        .increment(1);
}

pub fn record_oauth_link() {
    metrics::counter!("ibtikar_oauth_links_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("/health", 200, 0.05);
        record_upstream_error("x_api", "unavailable");
        record_rate_limited("/2/users/me");
        record_oauth_link();
    }

    /// Isolated recorder: only one global recorder can exist per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn request_metrics_render_with_route_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/v1/analysis/preview", 200, 1.2);
        record_request("/v1/analysis/preview", 429, 0.3);

        let output = handle.render();
        assert!(output.contains("ibtikar_http_requests_total"));
        assert!(output.contains("route=\"/v1/analysis/preview\""));
        assert!(output.contains("status=\"429\""));
        assert!(output.contains("ibtikar_request_duration_seconds_bucket"));
        assert!(output.contains("le=\"120\""));
    }

    #[test]
    fn ingested_counts_by_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_ingested(&LabelCounts {
            harmful: 2,
            safe: 5,
            unknown: 0,
        });

        let output = handle.render();
        assert!(output.contains("ibtikar_posts_ingested_total{label=\"harmful\"} 2"));
        assert!(output.contains("ibtikar_posts_ingested_total{label=\"safe\"} 5"));
        assert!(!output.contains("label=\"unknown\""));
    }

    #[test]
    fn rate_limits_and_links_are_counted() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_rate_limited("/2/users/:id/tweets");
        record_oauth_link();
        record_upstream_error("classifier", "unavailable");

        let output = handle.render();
        assert!(output.contains("resource=\"/2/users/:id/tweets\""));
        assert!(output.contains("ibtikar_oauth_links_total 1"));
        assert!(output.contains("upstream=\"classifier\""));
    }
}
