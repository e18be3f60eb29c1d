//! Metrics definitions for the Session Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix for Session Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by enums in this crate:
//! - `endpoint`: 16 signaling endpoints
//! - `status`: success, error
//! - `error_type`: http, server, invalid_response
//! - `reason`: `peer_departed`, `track_stopped`, `unsubscribed`, `readiness_failed`
//! - `trigger`: `user`, `transport_state`, `shutdown`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a tokio runtime, before any metric is recorded.
///
/// # Errors
///
/// Returns error if the address is invalid or a recorder is already installed.
pub fn init_metrics_recorder(bind_address: &str) -> Result<(), String> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| format!("Invalid metrics bind address '{bind_address}': {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        // Signaling round trips: local network to a regional server
        .set_buckets_for_metric(
            Matcher::Prefix("sc_signaling".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set signaling buckets: {e}"))?
        // Snapshot application is local work plus consumer closes
        .set_buckets_for_metric(
            Matcher::Prefix("sc_poll".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set poll buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Signaling Metrics
// ============================================================================

/// Record one signaling round trip.
///
/// Metrics: `sc_signaling_requests_total`, `sc_signaling_duration_seconds`
/// Labels: `endpoint`, `status`, `error_type` (counter only)
pub fn record_signaling_request(
    endpoint: &'static str,
    status: &'static str,
    error_type: Option<&'static str>,
    duration: Duration,
) {
    counter!(
        "sc_signaling_requests_total",
        "endpoint" => endpoint,
        "status" => status,
        "error_type" => error_type.unwrap_or("none"),
    )
    .increment(1);

    histogram!("sc_signaling_duration_seconds", "endpoint" => endpoint)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Record one reconciliation tick.
///
/// Metric: `sc_poll_ticks_total`
/// Labels: `status` (applied, stale, error)
pub fn record_poll_tick(status: &'static str) {
    counter!("sc_poll_ticks_total", "status" => status).increment(1);
}

/// Record time spent applying a snapshot (diff plus closes).
///
/// Metric: `sc_poll_apply_duration_seconds`
pub fn record_poll_apply_duration(duration: Duration) {
    histogram!("sc_poll_apply_duration_seconds").record(duration.as_secs_f64());
}

/// Record a consumer close.
///
/// Metric: `sc_consumers_closed_total`
/// Labels: `reason`
pub fn record_consumer_closed(reason: &'static str) {
    counter!("sc_consumers_closed_total", "reason" => reason).increment(1);
}

// ============================================================================
// Session Gauges
// ============================================================================

/// Metric: `sc_consumers_active`
pub fn set_active_consumers(count: usize) {
    // usize to f64 conversion is safe for realistic consumer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_consumers_active").set(count as f64);
}

/// Metric: `sc_producers_active`
pub fn set_active_producers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_producers_active").set(count as f64);
}

/// Record a full session teardown.
///
/// Metric: `sc_session_teardowns_total`
/// Labels: `trigger` (user, `transport_state`)
pub fn record_session_teardown(trigger: &'static str) {
    counter!("sc_session_teardowns_total", "trigger" => trigger).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_metric_functions_without_recorder() {
        // No recorder installed: calls fall through to the no-op recorder.
        record_signaling_request("sync", "success", None, Duration::from_millis(12));
        record_poll_tick("applied");
        record_poll_apply_duration(Duration::from_micros(300));
        record_consumer_closed("peer_departed");
        set_active_consumers(3);
        set_active_producers(2);
        record_session_teardown("user");
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_signaling_request(
                "recv-track",
                "error",
                Some("server"),
                Duration::from_millis(40),
            );
            record_consumer_closed("track_stopped");
            record_consumer_closed("track_stopped");
            set_active_consumers(4);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let closed = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "sc_consumers_closed_total")
            .expect("consumer close counter recorded");
        assert_eq!(closed.3, DebugValue::Counter(2));

        let requests = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "sc_signaling_requests_total")
            .expect("signaling counter recorded");
        let labels: Vec<_> = requests
            .0
            .key()
            .labels()
            .map(|l| (l.key().to_string(), l.value().to_string()))
            .collect();
        assert!(labels.contains(&("endpoint".to_string(), "recv-track".to_string())));
        assert!(labels.contains(&("error_type".to_string(), "server".to_string())));

        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "sc_signaling_duration_seconds"));
        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "sc_consumers_active"));
    }

    #[test]
    fn test_init_rejects_bad_address() {
        let err = init_metrics_recorder("not-an-address").unwrap_err();
        assert!(err.contains("Invalid metrics bind address"));
    }
}
