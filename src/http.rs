use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::net::TcpStream;

use crate::dto::*;
use crate::engine::{BulkSummary, Engine, EngineError, ErrorCode};
use crate::limits::MAX_BODY_BYTES;
use crate::model::*;
use crate::observability::{route_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::route::{parse_route, Route, RouteError};

pub type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("invalid request body: {0}")]
    Body(String),
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    fn code(&self) -> ErrorCode {
        match self {
            ApiError::Route(RouteError::NotFound { .. }) => ErrorCode::NotFound,
            ApiError::Route(_) | ApiError::Body(_) => ErrorCode::ValidationError,
            ApiError::Engine(e) => e.code(),
            ApiError::Encode(_) => ErrorCode::InternalError,
        }
    }

    fn into_response(self) -> HttpResponse {
        let code = self.code();
        let body = match &self {
            ApiError::Engine(e) => ErrorBody::from(e),
            other => ErrorBody::new(code, other.to_string()),
        };
        if code == ErrorCode::InternalError {
            tracing::error!("request failed: {self}");
        }
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match serde_json::to_vec(&body) {
            Ok(bytes) => json_response(status, Bytes::from(bytes)),
            Err(_) => json_response(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"{}")),
        }
    }
}

fn json_response(status: StatusCode, body: Bytes) -> HttpResponse {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn reply<T: Serialize>(status: StatusCode, value: &T) -> Result<HttpResponse, ApiError> {
    Ok(json_response(status, Bytes::from(serde_json::to_vec(value)?)))
}

fn ok<T: Serialize>(value: &T) -> Result<HttpResponse, ApiError> {
    reply(StatusCode::OK, value)
}

fn bulk(summary: &BulkSummary) -> Result<HttpResponse, ApiError> {
    let status = StatusCode::from_u16(summary.status().http_status()).unwrap_or(StatusCode::OK);
    reply(status, summary)
}

async fn read_body<B>(body: B) -> Result<Bytes, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ApiError::Body(e.to_string()))
}

async fn json_body<T, B>(body: B) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(body).await?;
    if bytes.is_empty() {
        return Err(ApiError::Body("request body is required".into()));
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Body(e.to_string()))
}

/// Like [`json_body`], but an empty body means `T::default()`.
async fn optional_json_body<T, B>(body: B) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(body).await?;
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Body(e.to_string()))
}

async fn dispatch<B>(engine: &Engine, route: Route, body: B) -> Result<HttpResponse, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match route {
        Route::Health => ok(&HealthView {
            status: "ok",
            quotas: engine.quota_count(),
            reservations: engine.reservation_count(),
        }),

        // ── quota ──
        Route::ListQuotas {
            start,
            end,
            page,
            limit,
        } => ok(&engine.list_quotas(start, end, page, limit).await?),
        Route::CreateQuota => {
            let new: NewQuota = json_body(body).await?;
            reply(StatusCode::CREATED, &engine.create_quota(new).await?)
        }
        Route::CreateQuotaRange => {
            let req: NewQuotaRange = json_body(body).await?;
            reply(StatusCode::CREATED, &engine.create_quota_range(req).await?)
        }
        Route::GetQuotaById(id) => ok(&engine.get_quota(QuotaKey::Id(id)).await?),
        Route::GetQuotaByDate(date) => ok(&engine.quota_with_occupancy(date).await?),
        Route::UpdateQuota(key) => {
            let patch: QuotaPatch = json_body(body).await?;
            ok(&engine.update_quota(key, patch).await?)
        }
        Route::UpdateQuotaRange { start, end } => {
            let patch: QuotaPatch = json_body(body).await?;
            ok(&engine.update_quota_range(start, end, patch).await?)
        }
        Route::BulkUpdateQuotas => {
            let items: Vec<QuotaUpdateItem> = json_body(body).await?;
            bulk(&engine.bulk_update_quotas(items).await?)
        }
        Route::DeleteQuota(key) => ok(&engine.delete_quota(key).await?),
        Route::DeleteQuotaRange => {
            let req: DateRangeRequest = json_body(body).await?;
            ok(&engine.delete_quota_range(req.start_date, req.end_date).await?)
        }
        Route::BulkDeleteQuotas => {
            let req: BulkDeleteRequest = json_body(body).await?;
            bulk(&engine.bulk_delete_quotas(req.ids).await?)
        }
        Route::OccupancyRange {
            start,
            end,
            occupancy_only,
        } => ok(&engine.occupancy_range(start, end, occupancy_only).await?),
        Route::Roster(date) => ok(&engine.roster_for_date(date).await?),

        // ── attendance ──
        Route::SetAttendance => {
            let update: AttendanceUpdate = json_body(body).await?;
            ok(&engine
                .set_attendance(&update.employee_id, update.date, update.has_attended)
                .await?)
        }
        Route::BulkSetAttendance => {
            let items: Vec<AttendanceUpdate> = json_body(body).await?;
            bulk(&engine.bulk_set_attendance(items).await?)
        }
        Route::SubmitManagerReport(date) => {
            let req: ManagerReportRequest = optional_json_body(body).await?;
            ok(&engine.submit_manager_report(date, req.reported_by).await?)
        }
        Route::ManagerReportStatus(date) => ok(&engine.report_status(date).await?),
        Route::AttendanceRange { start, end } => ok(&engine.attendance_range(start, end).await?),
        Route::AttendanceHistory { employee_id, limit } => {
            ok(&engine.attendance_history(&employee_id, limit).await?)
        }

        // ── reservations ──
        Route::EmployeeReservations(employee_id) => {
            let all = engine.reservations_for_employee(&employee_id).await?;
            ok(&all.iter().map(ReservationView::from).collect::<Vec<_>>())
        }
        Route::RecordReservation => {
            let sub: ReservationSubmission = json_body(body).await?;
            let stored = engine.record_reservation(sub).await?;
            reply(StatusCode::CREATED, &ReservationView::from(&stored))
        }
        Route::GetReservation(id) => ok(&ReservationView::from(&engine.get_reservation(id).await?)),

        // ── forms ──
        Route::PutSchema(form) => {
            let req: SchemaRequest = json_body(body).await?;
            let fields = engine.register_schema(&form, req.fields).await?;
            ok(&SchemaView::new(&form, &fields))
        }
        Route::GetSchema(form) => ok(&SchemaView::new(&form, &engine.get_schema(&form)?)),
        Route::PutDocument { form, id } => {
            let fields: Map<String, Value> = json_body(body).await?;
            ok(&engine.upsert_document(&form, &id, &fields).await?.to_json())
        }
        Route::GetDocument { form, id } => ok(&engine.get_document(&form, &id)?.to_json()),
        Route::DeleteDocument { form, id } => {
            engine.delete_document(&form, &id).await?;
            ok(&serde_json::json!({ "deleted": true }))
        }
        Route::ResolveSubmission(form) => {
            let record: Map<String, Value> = json_body(body).await?;
            ok(&engine.resolve_submission(&form, &record).await?)
        }
    }
}

/// Route, execute and encode one request. Never fails: every error becomes a
/// JSON error body with the matching status.
pub async fn handle<B>(engine: &Engine, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = parse_route(&method, &path, req.uri().query());
    let label = route.as_ref().map_or("unmatched", route_label);

    let result = match route {
        Ok(route) => dispatch(engine, route, req.into_body()).await,
        Err(e) => Err(ApiError::Route(e)),
    };
    let response = result.unwrap_or_else(ApiError::into_response);

    let status = response.status().as_u16().to_string();
    metrics::counter!(REQUESTS_TOTAL, "route" => label, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => label)
        .record(started.elapsed().as_secs_f64());
    tracing::debug!(%method, %path, status = response.status().as_u16(), "request handled");
    response
}

/// Serve HTTP/1.1 on one accepted socket until the peer closes it.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), hyper::Error> {
    let io = TokioIo::new(socket);
    let service = service_fn(move |req: Request<Incoming>| {
        let engine = engine.clone();
        async move { Ok::<_, Infallible>(handle(&engine, req).await) }
    });
    http1::Builder::new().serve_connection(io, service).await
}
