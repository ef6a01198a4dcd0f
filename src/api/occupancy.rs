use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::attendance::{AttendanceService, BlockPerson, occupancy::BlockSummary};
use crate::error::AttendanceError;

#[derive(Debug, Deserialize, IntoParams)]
pub struct BlockQuery {
    /// Block to list
    #[param(example = "A1")]
    pub block: String,
}

#[derive(Serialize, ToSchema)]
pub struct BlockPersonsResponse {
    #[schema(example = "A1")]
    pub block: String,
    /// Open records past the maximum session length, not listed below.
    #[schema(example = 0)]
    pub stale: usize,
    pub persons: Vec<BlockPerson>,
}

#[derive(Serialize, ToSchema)]
pub struct BlocksResponse {
    pub blocks: Vec<BlockSummary>,
}

/// People currently inside a block
#[utoipa::path(
    get,
    path = "/api/block_persons",
    params(BlockQuery),
    responses(
        (status = 200, description = "Employees with an open record in the block",
            body = BlockPersonsResponse, example = json!({
            "block": "A1",
            "stale": 0,
            "persons": [
                {"employee_id": "2261001", "name": "John Doe", "entry_time": "2026-01-05T10:00:00Z"}
            ]
        })),
        (status = 422, description = "Missing or empty block"),
        (status = 503, description = "Employee directory unavailable")
    ),
    tag = "Occupancy"
)]
#[instrument(name = "block_persons", skip(service, query), fields(block = %query.block))]
pub async fn block_persons(
    query: web::Query<BlockQuery>,
    service: web::Data<AttendanceService>,
) -> actix_web::Result<impl Responder> {
    let block = query.block.trim();
    if block.is_empty() {
        return Err(AttendanceError::invalid("block is empty").into());
    }

    let now = Utc::now();
    let persons = service.block_persons(block, now).await.map_err(|e| {
        error!(error = %e, "Failed to list block occupants");
        e
    })?;

    let count = service.current_occupancy(block, now);
    debug!(
        present = count.present,
        stale = count.stale,
        open = count.open(),
        "Block occupants listed"
    );

    Ok(HttpResponse::Ok().json(BlockPersonsResponse {
        block: block.to_owned(),
        stale: count.stale,
        persons,
    }))
}

/// Headcount of every occupied block
#[utoipa::path(
    get,
    path = "/api/blocks",
    responses(
        (status = 200, description = "Blocks with at least one open record",
            body = BlocksResponse, example = json!({
            "blocks": [
                {"block": "A1", "count": 12, "stale": 0},
                {"block": "B2", "count": 3, "stale": 1}
            ]
        }))
    ),
    tag = "Occupancy"
)]
pub async fn blocks(service: web::Data<AttendanceService>) -> impl Responder {
    HttpResponse::Ok().json(BlocksResponse {
        blocks: service.blocks(Utc::now()),
    })
}
