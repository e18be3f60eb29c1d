//! Observability module for the Session Controller.
//!
//! # Privacy by Default
//!
//! Spans use `#[instrument(skip_all)]` with explicit fields. Track labels and
//! raw SDP/RTP parameters are never logged. Metric labels are bounded by the
//! enums in this crate (endpoints, close reasons, teardown triggers).
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_signaling_requests_total` | Counter | `endpoint`, `status`, `error_type` | Signaling outcomes |
//! | `sc_signaling_duration_seconds` | Histogram | `endpoint` | Signaling round-trip time |
//! | `sc_poll_ticks_total` | Counter | `status` | Reconciliation ticks |
//! | `sc_poll_apply_duration_seconds` | Histogram | none | Snapshot application time |
//! | `sc_consumers_closed_total` | Counter | `reason` | Consumer closes by cause |
//! | `sc_consumers_active` | Gauge | none | Registered consumers |
//! | `sc_producers_active` | Gauge | none | Registered producers |
//! | `sc_session_teardowns_total` | Counter | `trigger` | Full session resets |

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_consumer_closed, record_poll_apply_duration, record_poll_tick,
    record_session_teardown, record_signaling_request, set_active_consumers, set_active_producers,
};
