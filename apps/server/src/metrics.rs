//! Prometheus metrics for the clinicq server

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

lazy_static! {
    // HTTP Request Metrics

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "clinicq_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");

    pub static ref HTTP_REQUESTS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "clinicq_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
        &["method", "path"]
    )
    .expect("Failed to register HTTP_REQUESTS_IN_FLIGHT");

    pub static ref HTTP_RATE_LIMITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_http_rate_limited_total",
        "Requests rejected by the rate limiter",
        &["path"]
    )
    .expect("Failed to register HTTP_RATE_LIMITED_TOTAL");

    // Queue Metrics

    pub static ref CHECK_INS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_check_ins_total",
        "Queue check-ins by channel and outcome",
        &["channel", "outcome"]
    )
    .expect("Failed to register CHECK_INS_TOTAL");

    /// Queue mutations by kind (check_in, remove, call_next, reorder, status, sweep)
    pub static ref QUEUE_MUTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_queue_mutations_total",
        "Queue mutations by kind",
        &["kind"]
    )
    .expect("Failed to register QUEUE_MUTATIONS_TOTAL");

    pub static ref QUEUE_ENTRIES_RENUMBERED: HistogramVec = register_histogram_vec!(
        "clinicq_queue_entries_renumbered",
        "Entries whose position or status changed per reconciliation",
        &["kind"],
        vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    )
    .expect("Failed to register QUEUE_ENTRIES_RENUMBERED");

    pub static ref APPOINTMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_appointments_total",
        "Appointment operations by kind and outcome",
        &["kind", "outcome"]
    )
    .expect("Failed to register APPOINTMENTS_TOTAL");

    // Realtime Metrics

    pub static ref REALTIME_EVENTS_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        "clinicq_realtime_events_published_total",
        "Realtime events published by event name",
        &["event"]
    )
    .expect("Failed to register REALTIME_EVENTS_PUBLISHED");

    pub static ref REALTIME_EVENTS_DROPPED: IntCounter = register_int_counter!(
        "clinicq_realtime_events_dropped_total",
        "Events skipped by lagging WebSocket subscribers"
    )
    .expect("Failed to register REALTIME_EVENTS_DROPPED");

    pub static ref WS_CONNECTIONS_OPEN: IntGauge = register_int_gauge!(
        "clinicq_ws_connections_open",
        "Open WebSocket connections"
    )
    .expect("Failed to register WS_CONNECTIONS_OPEN");

    pub static ref REALTIME_ROOMS: IntGauge = register_int_gauge!(
        "clinicq_realtime_rooms",
        "Rooms with at least one subscriber"
    )
    .expect("Failed to register REALTIME_ROOMS");

    // Billing Metrics

    pub static ref WEBHOOK_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_webhook_events_total",
        "Payment webhook events by type and outcome",
        &["event_type", "outcome"]
    )
    .expect("Failed to register WEBHOOK_EVENTS_TOTAL");

    // Sweeper Metrics

    pub static ref SWEEPER_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_sweeper_closed_total",
        "Records closed as NO_SHOW by the sweeper",
        &["kind"]
    )
    .expect("Failed to register SWEEPER_CLOSED_TOTAL");

    pub static ref SWEEPER_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clinicq_sweeper_runs_total",
        "Sweeper runs by outcome",
        &["outcome"]
    )
    .expect("Failed to register SWEEPER_RUNS_TOTAL");

    // Database Metrics

    pub static ref DB_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "clinicq_db_connections_active",
        "Number of active database connections"
    )
    .expect("Failed to register DB_CONNECTIONS_ACTIVE");

    pub static ref DB_CONNECTIONS_IDLE: IntGauge = register_int_gauge!(
        "clinicq_db_connections_idle",
        "Number of idle database connections"
    )
    .expect("Failed to register DB_CONNECTIONS_IDLE");
}

/// Collapse ids in a request path so metric labels stay low-cardinality.
///
/// UUID segments become `{id}` and the slug after `/clinics/` becomes `{slug}`.
pub fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        let label = if uuid::Uuid::parse_str(segment).is_ok() {
            "{id}"
        } else if previous == "clinics" && !segment.is_empty() && segment != "check-in" {
            "{slug}"
        } else {
            segment
        };
        out.push(label);
        previous = segment;
    }
    let joined = out.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}
