use actix_web::{HttpRequest, HttpResponse, web};
use chrono::Utc;
use tracing::error;

use crate::attendance::{AttendanceService, gateway::event_from_request};
use crate::model::scan::{ScanRequest, ScanResponse};

/// Header a reader may use to identify itself when the body does not.
const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// Record a tag read from a reader
#[utoipa::path(
    post,
    path = "/api/attendance",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan processed", body = ScanResponse, example = json!({
            "status": "exit",
            "employee_id": "2261001",
            "duration": 28800,
            "duration_hours": 8.0
        })),
        (status = 422, description = "Malformed body, unknown block or timestamp out of range",
            body = Object, example = json!({
            "error": "invalid scan event: timestamp is missing",
            "retryable": false
        })),
        (status = 429, description = "Too many requests"),
        (status = 503, description = "Directory or ledger unavailable; retry later",
            body = Object, example = json!({
            "error": "employee directory unavailable: directory lookup timed out",
            "retryable": true
        }))
    ),
    tag = "Attendance"
)]
pub async fn record_scan(
    req: HttpRequest,
    body: web::Json<ScanRequest>,
    service: web::Data<AttendanceService>,
) -> actix_web::Result<HttpResponse> {
    let request = body.into_inner();
    let device_id = device_id(&req, request.device_id.as_deref());

    let event = event_from_request(request, device_id)?;
    let outcome = service.record_scan(event, Utc::now()).await.map_err(|e| {
        if e.is_retryable() {
            error!(error = %e, "Scan could not be processed");
        }
        e
    })?;

    Ok(HttpResponse::Ok().json(ScanResponse::from(&outcome)))
}

/// Body field, then header, then the peer address.
fn device_id(req: &HttpRequest, from_body: Option<&str>) -> String {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_owned())
    };

    from_body
        .and_then(non_empty)
        .or_else(|| {
            req.headers()
                .get(DEVICE_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(non_empty)
        })
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{post, test_app, test_data};
    use actix_web::test;
    use chrono::{Duration, SecondsFormat};
    use serde_json::{Value, json};

    fn scan_body(tag: &str, block: &str, when: chrono::DateTime<Utc>) -> Value {
        json!({
            "rfid_tag": tag,
            "timestamp": when.to_rfc3339_opts(SecondsFormat::Secs, true),
            "block": block
        })
    }

    #[actix_web::test]
    async fn entry_then_exit() {
        let (data, _) = test_data(&[("E1", "AA11")]);
        let app = test_app!(data);
        let entered = Utc::now() - Duration::hours(8);

        let req = post("/api/attendance")
            .set_json(scan_body("AA11", "A1", entered))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"status": "entry", "employee_id": "E1"}));

        let req = post("/api/attendance")
            .set_json(scan_body("AA11", "A1", entered + Duration::hours(8)))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "exit");
        assert_eq!(body["duration"], 28800);
        assert_eq!(body["duration_hours"], 8.0);
    }

    #[actix_web::test]
    async fn unknown_tag_is_acknowledged() {
        let (data, _) = test_data(&[("E1", "AA11")]);
        let app = test_app!(data);

        let req = post("/api/attendance")
            .set_json(scan_body("UNKNOWN123", "A1", Utc::now()))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 200);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"status": "unknown_tag_logged"}));
    }

    #[actix_web::test]
    async fn malformed_bodies_are_unprocessable() {
        let (data, _) = test_data(&[("E1", "AA11")]);
        let app = test_app!(data);

        let bodies = [
            json!({"rfid_tag": "AA11", "timestamp": "2026-01-05T10:00:00Z"}),
            json!({"rfid_tag": "AA11", "block": "A1"}),
            json!({"rfid_tag": "AA11", "block": "A1", "timestamp": "soon"}),
            json!({"rfid_tag": "", "block": "A1", "timestamp": Utc::now().to_rfc3339()}),
        ];
        for body in bodies {
            let req = post("/api/attendance")
                .set_json(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 422);
        }

        let req = post("/api/attendance")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 422);
    }

    #[actix_web::test]
    async fn device_id_falls_back_to_header_then_peer() {
        let req = test::TestRequest::default()
            .insert_header((DEVICE_ID_HEADER, "gate-3"))
            .peer_addr("10.0.0.7:5000".parse().unwrap())
            .to_http_request();
        assert_eq!(device_id(&req, Some("reader-9")), "reader-9");
        assert_eq!(device_id(&req, Some("  ")), "gate-3");

        let req = test::TestRequest::default()
            .peer_addr("10.0.0.7:5000".parse().unwrap())
            .to_http_request();
        assert_eq!(device_id(&req, None), "10.0.0.7");
    }
}
