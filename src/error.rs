use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::{Display, Error};
use serde_json::json;

/// Seconds a reader should wait before retrying after a transient failure.
const RETRY_AFTER_SECS: &str = "2";

/// Failures surfaced by the attendance core.
///
/// Unknown tags and duplicate reads are outcomes, not errors, and never
/// show up here.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum AttendanceError {
    #[display(fmt = "invalid scan event: {}", reason)]
    InvalidEvent { reason: String },

    #[display(fmt = "employee directory unavailable: {}", reason)]
    DirectoryUnavailable { reason: String },

    #[display(fmt = "attendance store unavailable: {}", reason)]
    StoreUnavailable { reason: String },

    #[display(fmt = "{} not found", what)]
    NotFound { what: String },
}

impl AttendanceError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        AttendanceError::InvalidEvent {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttendanceError::DirectoryUnavailable { .. } | AttendanceError::StoreUnavailable { .. }
        )
    }
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::InvalidEvent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AttendanceError::DirectoryUnavailable { .. }
            | AttendanceError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AttendanceError::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut resp = HttpResponse::build(self.status_code());
        if self.is_retryable() {
            resp.insert_header(("Retry-After", RETRY_AFTER_SECS));
        }
        resp.json(json!({
            "error": self.to_string(),
            "retryable": self.is_retryable()
        }))
    }
}

/// Failures of the attendance store.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum StoreError {
    #[display(fmt = "{}", reason)]
    Unavailable { reason: String },

    /// Another writer changed the employee's open record first.
    #[display(fmt = "concurrent ledger write for employee {}", employee_id)]
    Conflict { employee_id: String },
}

impl StoreError {
    pub fn unavailable(reason: impl ToString) -> Self {
        StoreError::Unavailable {
            reason: reason.to_string(),
        }
    }

    /// Map a sqlx failure; duplicate keys on the open-record constraint
    /// become conflicts.
    pub fn from_sqlx(e: sqlx::Error, employee_id: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23000") {
                return StoreError::Conflict {
                    employee_id: employee_id.to_owned(),
                };
            }
        }
        StoreError::unavailable(e)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::unavailable(e)
    }
}

impl From<StoreError> for AttendanceError {
    fn from(e: StoreError) -> Self {
        AttendanceError::StoreUnavailable {
            reason: e.to_string(),
        }
    }
}

/// Failures of the employee directory.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum DirectoryError {
    #[display(fmt = "{}", reason)]
    Unavailable { reason: String },
}

impl From<sqlx::Error> for DirectoryError {
    fn from(e: sqlx::Error) -> Self {
        DirectoryError::Unavailable {
            reason: e.to_string(),
        }
    }
}

impl From<DirectoryError> for AttendanceError {
    fn from(e: DirectoryError) -> Self {
        AttendanceError::DirectoryUnavailable {
            reason: e.to_string(),
        }
    }
}
