//! Open/close state machine of the attendance ledger.
//!
//! Pure decision logic: given what the store knows about one employee and
//! a resolved scan, work out the ledger write. No I/O happens here.

use chrono::{DateTime, Utc};

use crate::attendance::policy::AttendancePolicy;
use crate::model::attendance::AttendanceRecord;

/// Per-employee ledger state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmployeeState {
    /// No open record. `last` is the most recent closed record, if any.
    NoOpenRecord { last: Option<AttendanceRecord> },
    /// Exactly one record with a null exit time.
    Open(AttendanceRecord),
}

/// A record about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opening {
    pub employee_id: String,
    pub block: String,
    pub entry_time: DateTime<Utc>,
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Inside the debounce window of the last accepted scan.
    Debounced,
    Enter(Opening),
    /// Carries the open record with its exit fields filled in.
    Exit(AttendanceRecord),
    /// The open record went stale; retire it for review and start over.
    Supersede {
        retired: AttendanceRecord,
        next: Opening,
    },
}

/// All-or-nothing store write derived from a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerWrite {
    pub close: Option<AttendanceRecord>,
    pub open: Option<Opening>,
}

impl LedgerWrite {
    pub fn employee_id(&self) -> &str {
        match (&self.close, &self.open) {
            (Some(closed), _) => &closed.employee_id,
            (None, Some(opening)) => &opening.employee_id,
            (None, None) => "",
        }
    }
}

impl Transition {
    /// `None` when nothing has to be written.
    pub fn into_write(self) -> Option<LedgerWrite> {
        match self {
            Transition::Debounced => None,
            Transition::Enter(opening) => Some(LedgerWrite {
                close: None,
                open: Some(opening),
            }),
            Transition::Exit(closed) => Some(LedgerWrite {
                close: Some(closed),
                open: None,
            }),
            Transition::Supersede { retired, next } => Some(LedgerWrite {
                close: Some(retired),
                open: Some(next),
            }),
        }
    }
}

/// Decide what a resolved scan at `observed_at` in `block` does.
pub fn decide(
    policy: &AttendancePolicy,
    employee_id: &str,
    state: &EmployeeState,
    block: &str,
    observed_at: DateTime<Utc>,
) -> Transition {
    let last_scan = match state {
        EmployeeState::Open(record) => Some(record.entry_time),
        EmployeeState::NoOpenRecord { last } => last.as_ref().map(AttendanceRecord::last_scan_at),
    };

    if let Some(previous) = last_scan {
        if (observed_at - previous).abs() < policy.debounce {
            return Transition::Debounced;
        }
    }

    let opening = |needs_review: bool| Opening {
        employee_id: employee_id.to_owned(),
        block: block.to_owned(),
        entry_time: observed_at,
        needs_review,
    };

    match state {
        EmployeeState::NoOpenRecord { .. } => {
            // Entering before the previous exit means the events arrived out of order.
            let out_of_order = last_scan.is_some_and(|previous| observed_at < previous);
            Transition::Enter(opening(out_of_order))
        }
        EmployeeState::Open(record) if record.is_stale_at(observed_at, policy.max_session) => {
            Transition::Supersede {
                retired: AttendanceRecord {
                    exit_time: Some(observed_at),
                    duration_secs: Some((observed_at - record.entry_time).num_seconds()),
                    needs_review: true,
                    stale: true,
                    ..record.clone()
                },
                next: opening(false),
            }
        }
        EmployeeState::Open(record) => {
            let elapsed = (observed_at - record.entry_time).num_seconds();
            Transition::Exit(AttendanceRecord {
                exit_time: Some(observed_at),
                duration_secs: Some(elapsed.max(0)),
                needs_review: record.needs_review || elapsed < 0,
                ..record.clone()
            })
        }
    }
}
