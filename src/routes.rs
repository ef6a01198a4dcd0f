use crate::{
    api::{attendance, occupancy, review},
    config::Config,
    error::AttendanceError,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{ResponseError, error::InternalError, web};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

/// Body and query parse failures answer 422 in the same shape as other errors.
fn unprocessable(err: impl std::fmt::Display + std::fmt::Debug + 'static) -> actix_web::Error {
    let detail = AttendanceError::invalid(err.to_string());
    InternalError::from_response(err, detail.error_response()).into()
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let scan_limiter = Arc::new(build_limiter(config.rate_scan_per_min));
    let query_limiter = Arc::new(build_limiter(config.rate_query_per_min));

    cfg.app_data(
        web::JsonConfig::default()
            .content_type_required(false)
            .error_handler(|err, _req| unprocessable(err)),
    )
    .app_data(web::QueryConfig::default().error_handler(|err, _req| unprocessable(err)));

    cfg.service(
        web::scope(&config.api_prefix)
            // device-facing
            .service(
                web::resource("/attendance")
                    .wrap(scan_limiter)
                    .route(web::post().to(attendance::record_scan)),
            )
            // occupancy
            .service(
                web::resource("/block_persons")
                    .wrap(query_limiter.clone())
                    .route(web::get().to(occupancy::block_persons)),
            )
            .service(
                web::resource("/blocks")
                    .wrap(query_limiter.clone())
                    .route(web::get().to(occupancy::blocks)),
            )
            // review
            .service(
                web::resource("/employee_logs")
                    .wrap(query_limiter.clone())
                    .route(web::get().to(review::employee_logs)),
            )
            .service(
                web::resource("/unknown_rfids")
                    .wrap(query_limiter.clone())
                    .route(web::get().to(review::unknown_rfids)),
            )
            .service(
                web::resource("/stale_records")
                    .wrap(query_limiter)
                    .route(web::get().to(review::stale_records)),
            ),
    );
}
