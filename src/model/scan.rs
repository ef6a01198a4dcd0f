use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use utoipa::ToSchema;

use crate::model::attendance::AttendanceRecord;

/// Body posted by an RFID reader.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[schema(example = json!({
    "rfid_tag": "AA11",
    "timestamp": "2026-01-05T10:00:00Z",
    "block": "A1",
    "device_id": "reader-a1-east"
}))]
pub struct ScanRequest {
    #[schema(example = "AA11")]
    pub rfid_tag: String,

    /// ISO-8601 instant; values without an offset are read as UTC.
    #[schema(example = "2026-01-05T10:00:00Z", format = "date-time", value_type = String)]
    pub timestamp: Option<String>,

    #[schema(example = "A1")]
    pub block: String,

    #[schema(example = "reader-a1-east", nullable = true)]
    pub device_id: Option<String>,
}

/// A validated scan, ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub tag: String,
    pub block: String,
    pub observed_at: DateTime<Utc>,
    pub device_id: String,
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanStatus {
    Entry,
    Exit,
    DuplicateIgnored,
    UnknownTagLogged,
}

/// What a scan did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A new record was opened. `retired` carries a stale record that the
    /// same scan closed for review.
    Entry {
        record: AttendanceRecord,
        retired: Option<AttendanceRecord>,
    },
    Exit {
        record: AttendanceRecord,
    },
    DuplicateIgnored {
        employee_id: String,
    },
    UnknownTagLogged,
}

impl ScanOutcome {
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanOutcome::Entry { .. } => ScanStatus::Entry,
            ScanOutcome::Exit { .. } => ScanStatus::Exit,
            ScanOutcome::DuplicateIgnored { .. } => ScanStatus::DuplicateIgnored,
            ScanOutcome::UnknownTagLogged => ScanStatus::UnknownTagLogged,
        }
    }

    pub fn employee_id(&self) -> Option<&str> {
        match self {
            ScanOutcome::Entry { record, .. } | ScanOutcome::Exit { record } => {
                Some(&record.employee_id)
            }
            ScanOutcome::DuplicateIgnored { employee_id } => Some(employee_id),
            ScanOutcome::UnknownTagLogged => None,
        }
    }
}

/// Acknowledgement sent back to the reader.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "exit",
    "employee_id": "2261001",
    "duration": 28800,
    "duration_hours": 8.0
}))]
pub struct ScanResponse {
    pub status: ScanStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,

    /// Seconds spent inside, present on exits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
}

impl From<&ScanOutcome> for ScanResponse {
    fn from(outcome: &ScanOutcome) -> Self {
        let closed = match outcome {
            ScanOutcome::Exit { record } => Some(record),
            _ => None,
        };
        Self {
            status: outcome.status(),
            employee_id: outcome.employee_id().map(str::to_owned),
            duration: closed.and_then(|r| r.duration_secs),
            duration_hours: closed.and_then(|r| r.duration_hours()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offsets_and_naive_timestamps() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();

        assert_eq!(parse_timestamp("2026-01-05T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-05T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-05T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp(" 2026-01-05 10:00:00.000 "), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(ScanStatus::UnknownTagLogged.as_ref(), "unknown_tag_logged");
        assert_eq!(
            serde_json::to_value(ScanStatus::DuplicateIgnored).unwrap(),
            serde_json::json!("duplicate_ignored")
        );
    }
}
