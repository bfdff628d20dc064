use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "hallbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "hallbook_query_duration_seconds";

/// Counter: reservation or manual event writes refused for overlapping a booking.
pub const CONFLICTS_TOTAL: &str = "hallbook_conflicts_total";

// ── Connection metrics ──────────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "hallbook_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hallbook_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hallbook_connections_rejected_total";

/// Gauge: loaded tenants.
pub const TENANTS_ACTIVE: &str = "hallbook_tenants_active";

/// Counter: failed `sessions` credential checks.
pub const AUTH_FAILURES_TOTAL: &str = "hallbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hallbook_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "hallbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "hallbook_wal_compactions_total";

/// Counter: notifications written to listening clients.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "hallbook_notifications_sent_total";

/// Counter: mails accepted by the relay.
pub const MAIL_SENT_TOTAL: &str = "hallbook_mail_sent_total";

/// Counter: mails the relay refused or never received.
pub const MAIL_FAILURES_TOTAL: &str = "hallbook_mail_failures_total";

/// Install the Prometheus exporter on `port`. No-op without a port; a bind failure
/// is logged and the server runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}

/// Short label for a command, for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertFacility { .. } => "insert_facility",
        Command::RenameFacility { .. } => "rename_facility",
        Command::DeleteFacility { .. } => "delete_facility",
        Command::SelectFacilities => "select_facilities",
        Command::InsertUser { .. } => "insert_user",
        Command::ImportUser { .. } => "import_user",
        Command::UpdateUser { .. } => "update_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::SelectUsers(_) => "select_users",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SetReservationStatus { .. } => "set_reservation_status",
        Command::SelectReservations(_) => "select_reservations",
        Command::InsertManualEvents { .. } => "insert_manual_events",
        Command::DuplicateManualEvent { .. } => "duplicate_manual_event",
        Command::UpdateManualEvent { .. } => "update_manual_event",
        Command::DeleteManualEvent { .. } => "delete_manual_event",
        Command::SelectManualEvents { .. } => "select_manual_events",
        Command::SelectActivityLogs { .. } => "select_activity_logs",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectSession { .. } => "select_session",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
