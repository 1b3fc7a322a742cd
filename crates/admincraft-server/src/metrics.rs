//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup, before
/// any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active streaming sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Broadcast messages dropped on full queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Rejected connection tokens (counter, labels: reason).
pub const AUTH_REJECTIONS_TOTAL: &str = "auth_rejections_total";
/// Admitted commands (counter).
pub const COMMANDS_ADMITTED_TOTAL: &str = "commands_admitted_total";
/// Rejected commands (counter, labels: reason).
pub const COMMANDS_REJECTED_TOTAL: &str = "commands_rejected_total";
/// Executions against the managed process (counter, labels: kind).
pub const DISPATCH_TOTAL: &str = "dispatch_total";
/// Failed executions (counter, labels: reason).
pub const DISPATCH_FAILURES_TOTAL: &str = "dispatch_failures_total";
/// Execution duration seconds (histogram, labels: kind).
pub const DISPATCH_DURATION_SECONDS: &str = "dispatch_duration_seconds";
