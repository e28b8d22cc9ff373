use std::collections::HashMap;

use chrono::NaiveDate;
use hyper::Method;
use ulid::Ulid;

use crate::model::{parse_date, QuotaKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },
    #[error("{param} must be a YYYY-MM-DD date, got {value:?}")]
    InvalidDate { param: &'static str, value: String },
    #[error("invalid id: {0:?}")]
    InvalidId(String),
    #[error("invalid query parameter {param}={value:?}")]
    InvalidQuery { param: &'static str, value: String },
}

/// A parsed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,

    ListQuotas {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        page: Option<usize>,
        limit: Option<usize>,
    },
    CreateQuota,
    CreateQuotaRange,
    GetQuotaById(Ulid),
    GetQuotaByDate(NaiveDate),
    UpdateQuota(QuotaKey),
    UpdateQuotaRange { start: NaiveDate, end: NaiveDate },
    BulkUpdateQuotas,
    DeleteQuota(QuotaKey),
    DeleteQuotaRange,
    BulkDeleteQuotas,

    OccupancyRange {
        start: NaiveDate,
        end: NaiveDate,
        occupancy_only: bool,
    },
    Roster(NaiveDate),

    SetAttendance,
    BulkSetAttendance,
    SubmitManagerReport(NaiveDate),
    ManagerReportStatus(NaiveDate),
    AttendanceRange { start: NaiveDate, end: NaiveDate },
    AttendanceHistory {
        employee_id: String,
        limit: Option<usize>,
    },

    EmployeeReservations(String),
    RecordReservation,
    GetReservation(Ulid),

    PutSchema(String),
    GetSchema(String),
    PutDocument { form: String, id: String },
    GetDocument { form: String, id: String },
    DeleteDocument { form: String, id: String },
    ResolveSubmission(String),
}

fn date(param: &'static str, raw: &str) -> Result<NaiveDate, RouteError> {
    parse_date(raw).ok_or_else(|| RouteError::InvalidDate {
        param,
        value: raw.to_string(),
    })
}

fn ulid(raw: &str) -> Result<Ulid, RouteError> {
    Ulid::from_string(raw).map_err(|_| RouteError::InvalidId(raw.to_string()))
}

/// `:id` under `quota/` is either a ULID or, for compatibility, a date.
fn quota_key(raw: &str) -> Result<QuotaKey, RouteError> {
    if let Some(d) = parse_date(raw) {
        return Ok(QuotaKey::Date(d));
    }
    ulid(raw).map(QuotaKey::Id)
}

struct Query(HashMap<String, String>);

impl Query {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Query(pairs)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn date(&self, key: &'static str) -> Result<Option<NaiveDate>, RouteError> {
        self.get(key).map(|v| date(key, v)).transpose()
    }

    fn number(&self, key: &'static str) -> Result<Option<usize>, RouteError> {
        self.get(key)
            .map(|v| {
                v.parse().map_err(|_| RouteError::InvalidQuery {
                    param: key,
                    value: v.to_string(),
                })
            })
            .transpose()
    }

    fn flag(&self, key: &'static str) -> Result<bool, RouteError> {
        match self.get(key) {
            None | Some("false") | Some("0") => Ok(false),
            Some("true") | Some("1") => Ok(true),
            Some(other) => Err(RouteError::InvalidQuery {
                param: key,
                value: other.to_string(),
            }),
        }
    }
}

/// Map method + path + query onto a [`Route`]. A leading `/api` is accepted.
pub fn parse_route(method: &Method, path: &str, query: Option<&str>) -> Result<Route, RouteError> {
    let trimmed = path.trim_matches('/');
    let trimmed = match trimmed.strip_prefix("api") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => trimmed,
    };
    let segments: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };
    let q = Query::parse(query);

    let route = match (method, segments.as_slice()) {
        (&Method::GET, [] | ["health"]) => Route::Health,

        // ── quota ──
        (&Method::GET, ["quota"]) => Route::ListQuotas {
            start: q.date("startDate")?,
            end: q.date("endDate")?,
            page: q.number("page")?,
            limit: q.number("limit")?,
        },
        (&Method::POST, ["quota"]) => Route::CreateQuota,
        (&Method::POST, ["quota", "range"]) => Route::CreateQuotaRange,
        (&Method::PUT, ["quota", "range", s, e]) => Route::UpdateQuotaRange {
            start: date("start", s)?,
            end: date("end", e)?,
        },
        (&Method::DELETE, ["quota", "range"]) => Route::DeleteQuotaRange,
        (&Method::PUT, ["quota", "bulk"]) => Route::BulkUpdateQuotas,
        (&Method::DELETE, ["quota", "bulk"]) => Route::BulkDeleteQuotas,
        (&Method::GET, ["quota", "date", d]) => Route::GetQuotaByDate(date("date", d)?),
        (&Method::PUT, ["quota", "date", d]) => Route::UpdateQuota(QuotaKey::Date(date("date", d)?)),
        (&Method::DELETE, ["quota", "date", d]) => Route::DeleteQuota(QuotaKey::Date(date("date", d)?)),
        (&Method::GET, ["quota", "occupancy", "range", s, e]) => Route::OccupancyRange {
            start: date("start", s)?,
            end: date("end", e)?,
            occupancy_only: q.flag("occupancyOnly")?,
        },
        (&Method::GET, ["quota", "employees", d]) => Route::Roster(date("date", d)?),

        // ── attendance ──
        (&Method::PUT, ["quota", "attendance", "individual"]) => Route::SetAttendance,
        (&Method::PUT, ["quota", "attendance", "bulk"]) => Route::BulkSetAttendance,
        (&Method::POST, ["quota", "attendance", "manager-report", d]) => {
            Route::SubmitManagerReport(date("date", d)?)
        }
        (&Method::GET, ["quota", "attendance", "manager-report", "status", d]) => {
            Route::ManagerReportStatus(date("date", d)?)
        }
        (&Method::GET, ["quota", "attendance", "range", s, e]) => Route::AttendanceRange {
            start: date("start", s)?,
            end: date("end", e)?,
        },

        // ── quota by id (after every literal segment above) ──
        (&Method::GET, ["quota", id]) => Route::GetQuotaById(ulid(id)?),
        (&Method::PUT, ["quota", id]) => Route::UpdateQuota(quota_key(id)?),
        (&Method::DELETE, ["quota", id]) => Route::DeleteQuota(quota_key(id)?),

        // ── employees & reservations ──
        (&Method::GET, ["employees", id, "attendance-history"]) => Route::AttendanceHistory {
            employee_id: id.to_string(),
            limit: q.number("limit")?,
        },
        (&Method::GET, ["employees", id, "reservations"]) => Route::EmployeeReservations(id.to_string()),
        (&Method::POST, ["reservations"]) => Route::RecordReservation,
        (&Method::GET, ["reservations", id]) => Route::GetReservation(ulid(id)?),

        // ── forms ──
        (&Method::PUT, ["forms", form, "schema"]) => Route::PutSchema(form.to_string()),
        (&Method::GET, ["forms", form, "schema"]) => Route::GetSchema(form.to_string()),
        (&Method::PUT, ["forms", form, "documents", id]) => Route::PutDocument {
            form: form.to_string(),
            id: id.to_string(),
        },
        (&Method::GET, ["forms", form, "documents", id]) => Route::GetDocument {
            form: form.to_string(),
            id: id.to_string(),
        },
        (&Method::DELETE, ["forms", form, "documents", id]) => Route::DeleteDocument {
            form: form.to_string(),
            id: id.to_string(),
        },
        (&Method::POST, ["forms", form, "resolve"]) => Route::ResolveSubmission(form.to_string()),

        _ => {
            return Err(RouteError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            });
        }
    };
    Ok(route)
}
