use crate::api::occupancy::{BlockPersonsResponse, BlocksResponse};
use crate::api::review::{EmployeeLogsResponse, StaleRecordsResponse, UnknownRfidsResponse};
use crate::attendance::BlockPerson;
use crate::attendance::occupancy::BlockSummary;
use crate::model::attendance::AttendanceRecord;
use crate::model::scan::{ScanRequest, ScanResponse, ScanStatus};
use crate::model::unknown_rfid::UnknownTagEvent;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "RFID Attendance API",
        version = "1.0.0",
        description = r#"
## RFID Attendance Event Processor

Turns tag reads from access-control readers into an attendance ledger:
who is present, in which block, since when and for how long.

### 🔹 Key Features
- **Scan ingest**
  - Entry/exit decided per employee; rapid double reads are ignored
  - Unknown tags are acknowledged and kept for review, never recorded as attendance
- **Occupancy**
  - Live headcount and occupant list per block
- **Review**
  - Per-employee history, unknown tags and records left open too long

### 📦 Response Format
- JSON bodies; transient failures answer `503` with `Retry-After`

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::attendance::record_scan,

        crate::api::occupancy::block_persons,
        crate::api::occupancy::blocks,

        crate::api::review::employee_logs,
        crate::api::review::unknown_rfids,
        crate::api::review::stale_records
    ),
    components(
        schemas(
            ScanRequest,
            ScanResponse,
            ScanStatus,
            BlockPerson,
            BlockPersonsResponse,
            BlockSummary,
            BlocksResponse,
            AttendanceRecord,
            EmployeeLogsResponse,
            UnknownTagEvent,
            UnknownRfidsResponse,
            StaleRecordsResponse
        )
    ),
    tags(
        (name = "Attendance", description = "Reader-facing scan ingest"),
        (name = "Occupancy", description = "Live block headcount"),
        (name = "Review", description = "Operator review of the ledger"),
    )
)]
pub struct ApiDoc;
