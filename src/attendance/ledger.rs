use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::attendance::locks::KeyedLocks;
use crate::attendance::occupancy::{OccupancyDelta, OccupancyTracker};
use crate::attendance::policy::AttendancePolicy;
use crate::attendance::transition::{EmployeeState, decide};
use crate::error::StoreError;
use crate::model::{attendance::AttendanceRecord, scan::ScanOutcome};
use crate::store::{AttendanceStore, Committed};

/// Conflicting writes (another process touched the same employee) are
/// re-read and re-decided this many times before giving up.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Authoritative open/closed intervals per employee.
///
/// Every transition runs under the employee's lock: read state, decide,
/// commit, then feed the committed records to the occupancy tracker.
pub struct Ledger {
    store: Arc<dyn AttendanceStore>,
    tracker: Arc<OccupancyTracker>,
    locks: KeyedLocks,
    policy: AttendancePolicy,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        tracker: Arc<OccupancyTracker>,
        policy: AttendancePolicy,
    ) -> Self {
        Self {
            store,
            tracker,
            locks: KeyedLocks::new(),
            policy,
        }
    }

    pub fn tracker(&self) -> &Arc<OccupancyTracker> {
        &self.tracker
    }

    /// Apply a resolved scan for `employee_id`.
    #[instrument(name = "ledger_transition", skip(self), fields(attempts = tracing::field::Empty))]
    pub async fn apply_scan(
        &self,
        employee_id: &str,
        block: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<ScanOutcome, StoreError> {
        let _guard = self.locks.lock(employee_id).await;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tracing::Span::current().record("attempts", attempt);

            let state = self.employee_state(employee_id).await?;
            let transition = decide(&self.policy, employee_id, &state, block, observed_at);

            let Some(write) = transition.into_write() else {
                debug!("Read inside debounce window; ignored");
                return Ok(ScanOutcome::DuplicateIgnored {
                    employee_id: employee_id.to_owned(),
                });
            };

            match self.store.commit(&write).await {
                Ok(committed) => {
                    let deltas = deltas(&committed);
                    self.tracker.apply(&deltas);
                    for delta in &deltas {
                        debug!(
                            block = delta.block(),
                            open = self.tracker.open_count(delta.block()),
                            "Occupancy updated"
                        );
                    }
                    return outcome(committed);
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, "Ledger write conflicted; re-reading employee state");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Typed lookup of the employee's single open record.
    pub async fn find_open_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        self.store.find_open_record(employee_id).await
    }

    pub async fn employee_state(&self, employee_id: &str) -> Result<EmployeeState, StoreError> {
        if let Some(open) = self.find_open_record(employee_id).await? {
            return Ok(EmployeeState::Open(open));
        }
        let last = self.store.find_latest_record(employee_id).await?;
        Ok(EmployeeState::NoOpenRecord { last })
    }

    pub async fn recent_records(
        &self,
        employee_id: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.store.recent_records(employee_id, limit).await
    }

    /// Open records past the maximum session length at `now`, oldest first.
    pub async fn stale_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stale: Vec<AttendanceRecord> = self
            .store
            .open_records(None)
            .await?
            .into_iter()
            .filter(|r| r.is_stale_at(now, self.policy.max_session))
            .collect();
        stale.sort_by_key(|r| r.entry_time);
        Ok(stale)
    }

    /// Recompute the occupancy cache from the store's open records.
    ///
    /// Returns `false` when a transition landed during the read; the next
    /// run picks it up.
    pub async fn reconcile(&self) -> Result<bool, StoreError> {
        let seen_version = self.tracker.version();
        let open = self.store.open_records(None).await?;
        let replaced = self.tracker.replace_if_unchanged(&open, seen_version);
        if replaced {
            info!(
                open_records = open.len(),
                lock_slots = self.locks.len(),
                "Occupancy reconciled with ledger"
            );
        } else {
            debug!("Occupancy reconcile skipped; ledger moved during the read");
        }
        Ok(replaced)
    }
}

fn deltas(committed: &Committed) -> Vec<OccupancyDelta> {
    committed
        .closed
        .iter()
        .map(OccupancyDelta::closed)
        .chain(committed.opened.iter().map(OccupancyDelta::opened))
        .collect()
}

fn outcome(committed: Committed) -> Result<ScanOutcome, StoreError> {
    match committed {
        Committed {
            closed,
            opened: Some(record),
        } => {
            info!(record_id = record.id, block = %record.block, "Entry recorded");
            if let Some(retired) = &closed {
                warn!(record_id = retired.id, "Stale open record retired for review");
            }
            Ok(ScanOutcome::Entry {
                record,
                retired: closed,
            })
        }
        Committed {
            closed: Some(record),
            opened: None,
        } => {
            info!(record_id = record.id, duration_secs = ?record.duration_secs, "Exit recorded");
            Ok(ScanOutcome::Exit { record })
        }
        Committed {
            closed: None,
            opened: None,
        } => Err(StoreError::unavailable("store committed an empty write")),
    }
}
