use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, ToSchema};

use crate::attendance::AttendanceService;
use crate::error::AttendanceError;
use crate::model::{attendance::AttendanceRecord, unknown_rfid::UnknownTagEvent};

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmployeeLogsQuery {
    #[param(example = "2261001")]
    pub employee_id: String,
    /// Defaults to 10, at most 100
    #[param(example = 10)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitQuery {
    /// Defaults to 10, at most 100
    #[param(example = 10)]
    pub limit: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct EmployeeLogsResponse {
    #[schema(example = "2261001")]
    pub employee_id: String,
    pub logs: Vec<AttendanceRecord>,
}

#[derive(Serialize, ToSchema)]
pub struct UnknownRfidsResponse {
    pub unknown: Vec<UnknownTagEvent>,
}

#[derive(Serialize, ToSchema)]
pub struct StaleRecordsResponse {
    pub records: Vec<AttendanceRecord>,
}

/// Recent attendance records of one employee
#[utoipa::path(
    get,
    path = "/api/employee_logs",
    params(EmployeeLogsQuery),
    responses(
        (status = 200, description = "Newest record first", body = EmployeeLogsResponse),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "error": "employee 9999 not found",
            "retryable": false
        })),
        (status = 422, description = "Missing employee_id"),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Review"
)]
pub async fn employee_logs(
    query: web::Query<EmployeeLogsQuery>,
    service: web::Data<AttendanceService>,
) -> actix_web::Result<impl Responder> {
    let employee_id = query.employee_id.trim();
    if employee_id.is_empty() {
        return Err(AttendanceError::invalid("employee_id is empty").into());
    }

    let logs = service
        .employee_logs(employee_id, clamp_limit(query.limit))
        .await
        .map_err(|e| {
            if e.is_retryable() {
                error!(error = %e, employee_id, "Failed to load employee logs");
            }
            e
        })?;

    Ok(HttpResponse::Ok().json(EmployeeLogsResponse {
        employee_id: employee_id.to_owned(),
        logs,
    }))
}

/// Scans of unregistered tags, newest first
#[utoipa::path(
    get,
    path = "/api/unknown_rfids",
    params(LimitQuery),
    responses(
        (status = 200, description = "Unknown-tag sightings",
            body = UnknownRfidsResponse, example = json!({
            "unknown": [{
                "id": 7,
                "tag": "UNKNOWN123",
                "block": "A1",
                "first_seen": "2026-01-05T10:00:00Z",
                "last_seen": "2026-01-05T10:04:00Z",
                "hits": 3
            }]
        })),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Review"
)]
pub async fn unknown_rfids(
    query: web::Query<LimitQuery>,
    service: web::Data<AttendanceService>,
) -> actix_web::Result<impl Responder> {
    let unknown = service.unknown_tags(clamp_limit(query.limit)).await.map_err(|e| {
        error!(error = %e, "Failed to list unknown tags");
        e
    })?;

    Ok(HttpResponse::Ok().json(UnknownRfidsResponse { unknown }))
}

/// Open records left past the maximum session length
#[utoipa::path(
    get,
    path = "/api/stale_records",
    responses(
        (status = 200, description = "Oldest entry first", body = StaleRecordsResponse),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Review"
)]
pub async fn stale_records(
    service: web::Data<AttendanceService>,
) -> actix_web::Result<impl Responder> {
    let records = service.stale_records(Utc::now()).await.map_err(|e| {
        error!(error = %e, "Failed to list stale records");
        e
    })?;

    Ok(HttpResponse::Ok().json(StaleRecordsResponse { records }))
}
