use std::net::SocketAddr;

use crate::route::Route;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "headcount_requests_total";

/// Histogram: request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "headcount_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "headcount_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "headcount_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "headcount_connections_rejected_total";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: quota rows written. Labels: op (create, update, delete).
pub const QUOTA_WRITES_TOTAL: &str = "headcount_quota_writes_total";

/// Counter: manager reports refused because the date was already reported.
pub const MANAGER_REPORT_CONFLICTS_TOTAL: &str = "headcount_manager_report_conflicts_total";

/// Counter: attendance marks written.
pub const ATTENDANCE_MARKS_TOTAL: &str = "headcount_attendance_marks_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "headcount_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "headcount_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Route variant to a short label for metrics.
pub fn route_label(route: &Route) -> &'static str {
    match route {
        Route::Health => "health",
        Route::ListQuotas { .. } => "list_quotas",
        Route::CreateQuota => "create_quota",
        Route::CreateQuotaRange => "create_quota_range",
        Route::GetQuotaById(_) => "get_quota",
        Route::GetQuotaByDate(_) => "get_quota_by_date",
        Route::UpdateQuota(_) => "update_quota",
        Route::UpdateQuotaRange { .. } => "update_quota_range",
        Route::BulkUpdateQuotas => "bulk_update_quotas",
        Route::DeleteQuota(_) => "delete_quota",
        Route::DeleteQuotaRange => "delete_quota_range",
        Route::BulkDeleteQuotas => "bulk_delete_quotas",
        Route::OccupancyRange { .. } => "occupancy_range",
        Route::Roster(_) => "roster",
        Route::SetAttendance => "set_attendance",
        Route::BulkSetAttendance => "bulk_set_attendance",
        Route::SubmitManagerReport(_) => "submit_manager_report",
        Route::ManagerReportStatus(_) => "manager_report_status",
        Route::AttendanceRange { .. } => "attendance_range",
        Route::AttendanceHistory { .. } => "attendance_history",
        Route::EmployeeReservations(_) => "employee_reservations",
        Route::RecordReservation => "record_reservation",
        Route::GetReservation(_) => "get_reservation",
        Route::PutSchema(_) => "put_schema",
        Route::GetSchema(_) => "get_schema",
        Route::PutDocument { .. } => "put_document",
        Route::GetDocument { .. } => "get_document",
        Route::DeleteDocument { .. } => "delete_document",
        Route::ResolveSubmission(_) => "resolve_submission",
    }
}
