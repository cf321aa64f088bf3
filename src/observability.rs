use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol requests handled. Labels: request, status.
pub const REQUESTS_TOTAL: &str = "gridlock_requests_total";

/// Histogram: request latency in seconds. Labels: request.
pub const REQUEST_DURATION_SECONDS: &str = "gridlock_request_duration_seconds";

/// Counter: conflict verdicts returned by the checker.
pub const CONFLICTS_DETECTED_TOTAL: &str = "gridlock_conflicts_detected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "gridlock_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "gridlock_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "gridlock_connections_rejected_total";

/// Gauge: live soft locks across all sessions.
pub const LOCKS_ACTIVE: &str = "gridlock_locks_active";

/// Counter: locks reclaimed by the reaper.
pub const LOCKS_REAPED_TOTAL: &str = "gridlock_locks_reaped_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(request: &Request) -> &'static str {
    match request {
        Request::ReserveRoom { .. } => "reserve_room",
        Request::ReleaseRoom { .. } => "release_room",
        Request::ReserveProfessor { .. } => "reserve_professor",
        Request::ReleaseProfessor { .. } => "release_professor",
        Request::CheckRoomConflicts { .. } => "check_room_conflicts",
        Request::CheckProfessorConflicts { .. } => "check_professor_conflicts",
        Request::ClearSessionBuffer => "clear_session_buffer",
        Request::Watch { .. } => "watch",
        Request::Unwatch { .. } => "unwatch",
    }
}
