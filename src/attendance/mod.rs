//! Attendance core: scan ingest, the per-employee ledger state machine,
//! live block occupancy and the unknown-tag sink.

pub mod gateway;
pub mod ledger;
pub mod locks;
pub mod occupancy;
pub mod policy;
pub mod transition;
pub mod unknown_sink;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use utoipa::ToSchema;

use crate::directory::TagDirectory;
use crate::error::{AttendanceError, DirectoryError, StoreError};
use crate::model::attendance::AttendanceRecord;
use crate::model::scan::{ScanEvent, ScanOutcome};
use crate::model::unknown_rfid::UnknownTagEvent;
use crate::store::AttendanceStore;

use gateway::Gateway;
use ledger::Ledger;
use occupancy::{BlockSummary, OccupancyCount, OccupancyTracker};
use policy::AttendancePolicy;
use unknown_sink::UnknownTagSink;

/// Person currently inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BlockPerson {
    #[schema(example = "2261001")]
    pub employee_id: String,
    /// Null when the directory no longer knows the employee.
    #[schema(example = "John Doe", nullable = true)]
    pub name: Option<String>,
    #[schema(example = "2026-01-05T10:00:00Z", value_type = String, format = "date-time")]
    pub entry_time: DateTime<Utc>,
}

/// Everything the HTTP layer talks to.
pub struct AttendanceService {
    policy: AttendancePolicy,
    gateway: Gateway,
    ledger: Arc<Ledger>,
    directory: Arc<dyn TagDirectory>,
    sink: Arc<UnknownTagSink>,
}

impl AttendanceService {
    pub fn new(
        policy: AttendancePolicy,
        directory: Arc<dyn TagDirectory>,
        store: Arc<dyn AttendanceStore>,
    ) -> Self {
        let tracker = Arc::new(OccupancyTracker::new(policy.max_session));
        let ledger = Arc::new(Ledger::new(store.clone(), tracker, policy));
        let sink = Arc::new(UnknownTagSink::new(store, policy));
        let gateway = Gateway::new(policy, directory.clone(), ledger.clone(), sink.clone());

        Self {
            policy,
            gateway,
            ledger,
            directory,
            sink,
        }
    }

    pub async fn record_scan(
        &self,
        event: ScanEvent,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AttendanceError> {
        self.gateway.ingest(event, now).await
    }

    pub fn current_occupancy(&self, block: &str, now: DateTime<Utc>) -> OccupancyCount {
        self.ledger.tracker().current_occupancy(block, now)
    }

    pub fn blocks(&self, now: DateTime<Utc>) -> Vec<BlockSummary> {
        self.ledger.tracker().summary(now)
    }

    /// Employees present in `block` with their directory names.
    pub async fn block_persons(
        &self,
        block: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockPerson>, AttendanceError> {
        let occupants = self.ledger.tracker().list_occupants(block, now);

        let lookups = occupants
            .iter()
            .map(|occupant| self.directory.employee(&occupant.employee_id));
        let employees =
            bounded_directory(self.policy.upstream_timeout, try_join_all(lookups)).await?;

        Ok(occupants
            .into_iter()
            .zip(employees)
            .map(|(occupant, employee)| BlockPerson {
                employee_id: occupant.employee_id,
                name: employee.map(|e| e.name),
                entry_time: occupant.entry_time,
            })
            .collect())
    }

    /// Most recent records of one employee, newest first.
    pub async fn employee_logs(
        &self,
        employee_id: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let records = bounded_store(
            self.policy.upstream_timeout,
            self.ledger.recent_records(employee_id, limit),
        )
        .await?;
        if records.is_empty() {
            let known = bounded_directory(
                self.policy.upstream_timeout,
                self.directory.employee(employee_id),
            )
            .await?;
            if known.is_none() {
                return Err(AttendanceError::NotFound {
                    what: format!("employee {employee_id}"),
                });
            }
        }
        Ok(records)
    }

    pub async fn stale_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        bounded_store(self.policy.upstream_timeout, self.ledger.stale_records(now)).await
    }

    pub async fn unknown_tags(&self, limit: u32) -> Result<Vec<UnknownTagEvent>, AttendanceError> {
        bounded_store(self.policy.upstream_timeout, self.sink.recent(limit)).await
    }

    pub async fn reconcile(&self) -> Result<bool, AttendanceError> {
        Ok(self.ledger.reconcile().await?)
    }
}

pub(crate) fn ledger_unavailable(reason: impl Into<String>) -> AttendanceError {
    AttendanceError::StoreUnavailable {
        reason: reason.into(),
    }
}

/// Run a store call under the fail-fast bound.
pub(crate) async fn bounded_store<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, AttendanceError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(AttendanceError::from),
        Err(_) => Err(ledger_unavailable("store call timed out")),
    }
}

/// Run a directory call under the fail-fast bound.
pub(crate) async fn bounded_directory<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, DirectoryError>>,
) -> Result<T, AttendanceError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(AttendanceError::from),
        Err(_) => Err(AttendanceError::DirectoryUnavailable {
            reason: "directory lookup timed out".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::{
        SlowDirectory, at, directory_with, service_with, test_service,
    };
    use chrono::Duration as ChronoDuration;
    use futures::future::join_all;

    fn scan(tag: &str, block: &str, observed_at: DateTime<Utc>) -> ScanEvent {
        ScanEvent {
            tag: tag.into(),
            block: block.into(),
            observed_at,
            device_id: "reader-1".into(),
        }
    }

    #[tokio::test]
    async fn end_to_end_entry_and_exit() {
        let (service, _) = test_service(&[("E1", "AA11")]);

        let entry = service
            .record_scan(scan("AA11", "A1", at(10, 0, 0)), at(10, 0, 0))
            .await
            .unwrap();
        assert!(matches!(entry, ScanOutcome::Entry { .. }));
        assert_eq!(service.current_occupancy("A1", at(10, 0, 1)).present, 1);

        let exit = service
            .record_scan(scan("AA11", "A1", at(18, 0, 0)), at(18, 0, 0))
            .await
            .unwrap();
        let ScanOutcome::Exit { record } = exit else {
            panic!("expected exit");
        };
        assert_eq!(record.duration_secs, Some(8 * 3600));
        assert_eq!(record.duration_hours(), Some(8.0));
        assert_eq!(service.current_occupancy("A1", at(18, 0, 1)).open(), 0);
    }

    #[tokio::test]
    async fn fifty_concurrent_entries_are_all_counted() {
        let tags: Vec<(String, String)> =
            (0..50).map(|i| (format!("E{i}"), format!("TAG{i}"))).collect();
        let pairs: Vec<(&str, &str)> = tags.iter().map(|(e, t)| (e.as_str(), t.as_str())).collect();
        let (service, store) = test_service(&pairs);
        let service = Arc::new(service);
        let now = at(9, 0, 0);

        let scans = tags.iter().map(|(_, tag)| {
            let service = service.clone();
            let event = scan(tag, "B2", now);
            tokio::spawn(async move { service.record_scan(event, now).await })
        });
        let results = join_all(scans).await;

        for result in results {
            assert!(matches!(result.unwrap().unwrap(), ScanOutcome::Entry { .. }));
        }
        assert_eq!(service.current_occupancy("B2", now).present, 50);
        assert_eq!(store.open_records(Some("B2")).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn occupancy_matches_ledger_after_mixed_concurrent_scans() {
        let tags: Vec<(String, String)> =
            (0..20).map(|i| (format!("E{i}"), format!("TAG{i}"))).collect();
        let pairs: Vec<(&str, &str)> = tags.iter().map(|(e, t)| (e.as_str(), t.as_str())).collect();
        let (service, store) = test_service(&pairs);
        let service = Arc::new(service);
        let blocks = ["A1", "B2", "C3"];
        let start = at(8, 0, 0);

        // every employee scans five times, ten seconds apart, across blocks;
        // each employee's scans race each other as well as everyone else's
        let mut handles = Vec::new();
        for (i, (_, tag)) in tags.iter().enumerate() {
            for round in 0..5i64 {
                let service = service.clone();
                let observed_at = start + ChronoDuration::seconds(round * 10);
                let event = scan(tag, blocks[(i + round as usize) % blocks.len()], observed_at);
                handles.push(tokio::spawn(async move {
                    service.record_scan(event, observed_at).await
                }));
            }
        }
        for result in join_all(handles).await {
            result.unwrap().unwrap();
        }

        let now = start + ChronoDuration::minutes(5);
        let open = store.open_records(None).await.unwrap();
        for block in blocks {
            let in_block = open.iter().filter(|r| r.block == block).count();
            assert_eq!(service.current_occupancy(block, now).open(), in_block);
        }
        // never more than one open record per employee
        let mut employees: Vec<_> = open.iter().map(|r| r.employee_id.clone()).collect();
        employees.sort();
        employees.dedup();
        assert_eq!(employees.len(), open.len());
    }

    #[tokio::test]
    async fn block_persons_carries_directory_names() {
        let (service, _) = test_service(&[("E1", "AA11"), ("E2", "BB22")]);
        service.record_scan(scan("AA11", "A1", at(9, 0, 0)), at(9, 0, 0)).await.unwrap();
        service.record_scan(scan("BB22", "A1", at(9, 30, 0)), at(9, 30, 0)).await.unwrap();

        let persons = service.block_persons("A1", at(10, 0, 0)).await.unwrap();

        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].employee_id, "E1");
        assert_eq!(persons[0].name.as_deref(), Some("Employee E1"));
        assert_eq!(persons[1].entry_time, at(9, 30, 0));
    }

    #[tokio::test]
    async fn slow_directory_fails_fast() {
        let policy = AttendancePolicy {
            upstream_timeout: std::time::Duration::from_millis(20),
            ..AttendancePolicy::default()
        };
        let directory = SlowDirectory {
            inner: directory_with(&[("E1", "AA11")]),
            delay: std::time::Duration::from_millis(500),
        };
        let (service, store) = service_with(policy, Arc::new(directory));

        let err = service
            .record_scan(scan("AA11", "A1", at(9, 0, 0)), at(9, 0, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, AttendanceError::DirectoryUnavailable { .. }));
        assert!(store.open_records(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_employee_logs_are_not_found() {
        let (service, _) = test_service(&[("E1", "AA11")]);

        assert!(service.employee_logs("E1", 10).await.unwrap().is_empty());
        assert!(matches!(
            service.employee_logs("nobody", 10).await,
            Err(AttendanceError::NotFound { .. })
        ));
    }
}
