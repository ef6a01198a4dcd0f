use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One attendance interval in the ledger.
///
/// Created open on an entry scan, closed exactly once on the following
/// accepted scan and never touched again afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 42,
        "employee_id": "2261001",
        "block": "A1",
        "entry_time": "2026-01-05T10:00:00Z",
        "exit_time": "2026-01-05T18:00:00Z",
        "duration_secs": 28800,
        "needs_review": false,
        "stale": false
    })
)]
pub struct AttendanceRecord {
    #[schema(example = 42)]
    pub id: u64,

    #[schema(example = "2261001")]
    pub employee_id: String,

    #[schema(example = "A1")]
    pub block: String,

    #[schema(example = "2026-01-05T10:00:00Z", value_type = String, format = "date-time")]
    pub entry_time: DateTime<Utc>,

    #[schema(
        example = "2026-01-05T18:00:00Z",
        value_type = String,
        format = "date-time",
        nullable = true
    )]
    pub exit_time: Option<DateTime<Utc>>,

    /// Whole seconds between entry and exit; null only while open.
    #[schema(example = 28800, nullable = true)]
    pub duration_secs: Option<i64>,

    /// Clock skew or out-of-order scans touched this record.
    pub needs_review: bool,

    /// Record was left open past the maximum session length.
    pub stale: bool,
}

impl AttendanceRecord {
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }

    /// Time of the last accepted scan that touched this record.
    pub fn last_scan_at(&self) -> DateTime<Utc> {
        self.exit_time.unwrap_or(self.entry_time)
    }

    /// Open for longer than `max_session` at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, max_session: Duration) -> bool {
        self.is_open() && now - self.entry_time > max_session
    }

    pub fn duration_hours(&self) -> Option<f64> {
        self.duration_secs
            .map(|secs| (secs as f64 / 3600.0 * 100.0).round() / 100.0)
    }
}
