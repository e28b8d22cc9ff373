//! Request bodies and JSON views that exist only at the HTTP boundary.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::{EngineError, ErrorCode};
use crate::model::{Reservation, Timestamp};
use crate::schema::{FieldDefinition, RawFieldDefinition};

// ── Requests ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerReportRequest {
    #[serde(default)]
    pub reported_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaRequest {
    pub fields: Vec<RawFieldDefinition>,
}

// ── Views ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: Ulid,
    /// `{id, display, resolved}`; display falls back to the raw id.
    pub employee: Value,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub attendance: BTreeMap<NaiveDate, bool>,
    pub unit: Option<String>,
    pub order_number: Option<String>,
    pub funding_source: Option<String>,
    pub created_at: Timestamp,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            employee: r.employee.to_json(),
            start_date: r.start_date,
            end_date: r.end_date,
            attendance: r.attendance.clone(),
            unit: r.unit.clone(),
            order_number: r.order_number.clone(),
            funding_source: r.funding_source.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SchemaView {
    pub form: String,
    pub fields: Vec<RawFieldDefinition>,
}

impl SchemaView {
    pub fn new(form: &str, fields: &[FieldDefinition]) -> Self {
        Self {
            form: form.to_string(),
            fields: fields.iter().map(RawFieldDefinition::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub status: &'static str,
    pub quotas: usize,
    pub reservations: usize,
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<Timestamp>,
}

/// `{"error": {"code", "message", ...}}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code,
                message: message.into(),
                reported_by: None,
                reported_at: None,
            },
        }
    }
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        let mut body = ErrorBody::new(e.code(), e.to_string());
        if let EngineError::AlreadyReported {
            reported_by,
            reported_at,
            ..
        } = e
        {
            body.error.reported_by = reported_by.clone();
            body.error.reported_at = *reported_at;
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_date, Reference};
    use chrono::Utc;

    #[test]
    fn double_report_error_carries_first_reporter() {
        let err = EngineError::AlreadyReported {
            date: parse_date("2025-06-20").unwrap(),
            reported_by: Some("maya".into()),
            reported_at: Some(Utc::now()),
        };
        let json = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(json["error"]["code"], "CONFLICT");
        assert_eq!(json["error"]["reportedBy"], "maya");
        assert!(json["error"]["reportedAt"].is_string());
    }

    #[test]
    fn plain_error_has_no_report_fields() {
        let err = EngineError::not_found("quota", "2025-06-20");
        let json = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert!(json["error"].get("reportedBy").is_none());
    }

    #[test]
    fn reservation_view_shows_unresolved_employee_as_id() {
        let r = Reservation {
            id: Ulid::new(),
            employee: Reference::Unresolved { id: "e9".into() },
            start_date: parse_date("2025-06-01").unwrap(),
            end_date: None,
            attendance: BTreeMap::from([(parse_date("2025-06-01").unwrap(), true)]),
            unit: None,
            order_number: Some("A-1".into()),
            funding_source: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ReservationView::from(&r)).unwrap();
        assert_eq!(json["employee"]["display"], "e9");
        assert_eq!(json["orderNumber"], "A-1");
        assert_eq!(json["attendance"]["2025-06-01"], true);
        assert_eq!(json["startDate"], "2025-06-01");
    }
}
