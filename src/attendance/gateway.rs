use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use moka::future::Cache;
use tracing::{Instrument, info, instrument, warn};
use uuid::Uuid;

use crate::attendance::ledger::Ledger;
use crate::attendance::locks::KeyedLocks;
use crate::attendance::policy::AttendancePolicy;
use crate::attendance::unknown_sink::UnknownTagSink;
use crate::attendance::{bounded_directory, ledger_unavailable};
use crate::directory::{Resolution, TagDirectory};
use crate::error::AttendanceError;
use crate::model::scan::{ScanEvent, ScanOutcome, ScanRequest, parse_timestamp};

/// Idempotency key of a delivery: retried requests carry the same triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReplayKey {
    tag: String,
    observed_at: DateTime<Utc>,
    device_id: String,
}

impl From<&ScanEvent> for ReplayKey {
    fn from(event: &ScanEvent) -> Self {
        Self {
            tag: event.tag.clone(),
            observed_at: event.observed_at,
            device_id: event.device_id.clone(),
        }
    }
}

/// Entry point for reader events: validate, resolve, hand to the ledger.
pub struct Gateway {
    policy: AttendancePolicy,
    directory: Arc<dyn TagDirectory>,
    ledger: Arc<Ledger>,
    sink: Arc<UnknownTagSink>,
    replay: Cache<ReplayKey, ScanOutcome>,
    tag_order: KeyedLocks,
}

/// Build a [`ScanEvent`] from a reader's request body.
///
/// `observed_at` is cut to milliseconds, the precision the ledger stores.
pub fn event_from_request(
    request: ScanRequest,
    device_id: String,
) -> Result<ScanEvent, AttendanceError> {
    let raw = request
        .timestamp
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .ok_or_else(|| AttendanceError::invalid("timestamp is missing"))?;
    let observed_at = parse_timestamp(raw)
        .ok_or_else(|| AttendanceError::invalid(format!("timestamp '{raw}' is not ISO-8601")))?;

    Ok(ScanEvent {
        tag: request.rfid_tag.trim().to_owned(),
        block: request.block.trim().to_owned(),
        observed_at: observed_at.trunc_subsecs(3),
        device_id,
    })
}

impl Gateway {
    pub fn new(
        policy: AttendancePolicy,
        directory: Arc<dyn TagDirectory>,
        ledger: Arc<Ledger>,
        sink: Arc<UnknownTagSink>,
    ) -> Self {
        Self {
            policy,
            directory,
            ledger,
            sink,
            replay: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(policy.replay_ttl())
                .build(),
            tag_order: KeyedLocks::new(),
        }
    }

    /// Reject events that must not reach the ledger.
    pub fn validate(&self, event: &ScanEvent, now: DateTime<Utc>) -> Result<(), AttendanceError> {
        if event.tag.trim().is_empty() {
            return Err(AttendanceError::invalid("rfid_tag is empty"));
        }
        if event.block.trim().is_empty() {
            return Err(AttendanceError::invalid("block is empty"));
        }
        if event.observed_at > now + self.policy.clock_skew {
            return Err(AttendanceError::invalid(format!(
                "timestamp {} is ahead of server time",
                event.observed_at.to_rfc3339()
            )));
        }
        if event.observed_at < now - self.policy.staleness {
            return Err(AttendanceError::invalid(format!(
                "timestamp {} is too old",
                event.observed_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    async fn check_block(&self, block: &str) -> Result<(), AttendanceError> {
        let registered = bounded_directory(
            self.policy.upstream_timeout,
            self.directory.block_registered(block),
        )
        .await?;
        if !registered {
            return Err(AttendanceError::invalid(format!(
                "block '{block}' is not registered"
            )));
        }
        Ok(())
    }

    /// Process one scan as a single unit of work.
    ///
    /// Redelivery of the same `(tag, observed_at, device_id)` inside the
    /// replay window returns the first delivery's outcome without touching
    /// the ledger again; concurrent duplicates wait for the first one.
    #[instrument(
        name = "scan_ingest",
        skip(self, event, now),
        fields(
            scan_id = %Uuid::new_v4(),
            tag = %event.tag,
            block = %event.block,
            device_id = %event.device_id
        )
    )]
    pub async fn ingest(
        &self,
        event: ScanEvent,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AttendanceError> {
        if let Err(e) = self.validate(&event, now) {
            info!(error = %e, "Scan rejected");
            return Err(e);
        }
        if let Err(e) = self.check_block(&event.block).await {
            if !e.is_retryable() {
                info!(error = %e, "Scan rejected");
            }
            return Err(e);
        }

        let key = ReplayKey::from(&event);
        self.replay
            .try_get_with(key, self.process(event))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn process(&self, event: ScanEvent) -> Result<ScanOutcome, AttendanceError> {
        // Held until the ledger answers, so reads of one tag reach the
        // employee lock in the order they arrived here.
        let _ticket = self.tag_order.lock(&event.tag).await;

        let resolution = bounded_directory(
            self.policy.upstream_timeout,
            self.directory.resolve(&event.tag),
        )
        .await?;

        let employee_id = match resolution {
            Resolution::Employee(employee_id) => employee_id,
            Resolution::Unknown => {
                self.sink.record(&event.tag, &event.block, event.observed_at).await;
                return Ok(ScanOutcome::UnknownTagLogged);
            }
        };

        // The transition runs as its own task: a timed-out or dropped request
        // must not cut a ledger commit off from its occupancy update.
        let ledger = self.ledger.clone();
        let work = tokio::spawn(
            async move {
                ledger
                    .apply_scan(&employee_id, &event.block, event.observed_at)
                    .await
            }
            .in_current_span(),
        );

        match tokio::time::timeout(self.policy.upstream_timeout, work).await {
            Ok(Ok(result)) => result.map_err(AttendanceError::from),
            Ok(Err(e)) => Err(ledger_unavailable(format!("ledger task failed: {e}"))),
            Err(_) => {
                warn!("Ledger transition exceeded the upstream timeout");
                Err(ledger_unavailable("ledger write timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::occupancy::OccupancyTracker;
    use crate::store::{AttendanceStore, memory::InMemoryStore};
    use crate::test_support::helpers::{DownDirectory, SlowFirstLookup, at, directory_with};
    use chrono::{Duration, Timelike};

    fn gateway(
        directory: Arc<dyn TagDirectory>,
        policy: AttendancePolicy) -> (Gateway, Arc<InMemoryStore>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let tracker = Arc::new(OccupancyTracker::new(policy.max_session));
        let ledger = Arc::new(Ledger::new(store.clone(), tracker, policy));
        let sink = Arc::new(UnknownTagSink::new(store.clone(), policy));
        (Gateway::new(policy, directory, ledger, sink), store)
    }

    fn scan(tag: &str, block: &str, observed_at: DateTime<Utc>) -> ScanEvent {
        ScanEvent {
            tag: tag.into(),
            block: block.into(),
            observed_at,
            device_id: "reader-1".into(),
        }
    }

    #[test]
    fn missing_or_garbled_timestamps_are_invalid() {
        let request = ScanRequest {
            rfid_tag: "AA11".into(),
            timestamp: None,
            block: "A1".into(),
            device_id: None,
        };
        assert!(matches!(
            event_from_request(request.clone(), "r".into()),
            Err(AttendanceError::InvalidEvent { .. })
        ));

        let garbled = ScanRequest {
            timestamp: Some("10 o'clock".into()),
            ..request
        };
        assert!(matches!(
            event_from_request(garbled, "r".into()),
            Err(AttendanceError::InvalidEvent { .. })
        ));
    }

    #[test]
    fn timestamps_are_cut_to_milliseconds() {
        let request = ScanRequest {
            rfid_tag: "AA11".into(),
            timestamp: Some("2026-01-05T10:00:00.123456789Z".into()),
            block: "A1".into(),
            device_id: None,
        };

        let event = event_from_request(request, "r".into()).unwrap();

        assert_eq!(event.observed_at.nanosecond(), 123_000_000);
        assert_eq!(event.observed_at, at(10, 0, 0) + Duration::milliseconds(123));
    }

    #[tokio::test]
    async fn unregistered_block_is_rejected_before_the_ledger() {
        let policy = AttendancePolicy::default();
        let (gateway, store) = gateway(Arc::new(directory_with(&[("E1", "AA11")])), policy);
        let now = at(12, 0, 0);

        for tag in ["AA11", "UNKNOWN123"] {
            let result = gateway.ingest(scan(tag, "!!no-such-block!!", now), now).await;
            assert!(matches!(result, Err(AttendanceError::InvalidEvent { .. })));
        }

        assert!(store.open_records(None).await.unwrap().is_empty());
        assert!(store.list_unknown_tags(10).await.unwrap().is_empty());
        assert!(gateway.ledger.tracker().summary(now).is_empty());
    }

    #[tokio::test]
    async fn same_tag_reaches_the_ledger_in_arrival_order() {
        let policy = AttendancePolicy::default();
        let directory = SlowFirstLookup::new(
            directory_with(&[("E1", "AA11")]),
            std::time::Duration::from_millis(100),
        );
        let (gateway, _) = gateway(Arc::new(directory), policy);
        let gateway = Arc::new(gateway);
        let now = at(12, 0, 0);

        // the first read's lookup is slow; the second must still wait for it
        let first = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .ingest(scan("AA11", "A1", now - Duration::seconds(10)), now)
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = gateway.ingest(scan("AA11", "B2", now), now).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(matches!(first, ScanOutcome::Entry { .. }));
        let ScanOutcome::Exit { record } = second else {
            panic!("expected exit");
        };
        assert_eq!(record.block, "A1");
        assert_eq!(record.duration_secs, Some(10));
        assert!(!record.needs_review);
    }

    #[tokio::test]
    async fn rejects_empty_fields_and_out_of_range_times_without_side_effects() {
        let policy = AttendancePolicy::default();
        let (gateway, store) = gateway(Arc::new(directory_with(&[("E1", "AA11")])), policy);
        let now = at(12, 0, 0);

        let cases = [
            scan("", "A1", now),
            scan("AA11", "  ", now),
            scan("AA11", "A1", now + policy.clock_skew + Duration::seconds(1)),
            scan("AA11", "A1", now - policy.staleness - Duration::seconds(1)),
        ];
        for event in cases {
            let result = gateway.ingest(event, now).await;
            assert!(matches!(result, Err(AttendanceError::InvalidEvent { .. })));
        }

        assert!(store.open_records(None).await.unwrap().is_empty());
        assert!(store.list_unknown_tags(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepts_small_future_skew() {
        let policy = AttendancePolicy::default();
        let (gateway, _) = gateway(Arc::new(directory_with(&[("E1", "AA11")])), policy);
        let now = at(12, 0, 0);

        let outcome = gateway
            .ingest(scan("AA11", "A1", now + Duration::seconds(90)), now)
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Entry { .. }));
    }

    #[tokio::test]
    async fn redelivery_returns_the_first_result() {
        let policy = AttendancePolicy::default();
        let (gateway, store) = gateway(Arc::new(directory_with(&[("E1", "AA11")])), policy);
        let now = at(12, 0, 0);

        let first = gateway.ingest(scan("AA11", "A1", now), now).await.unwrap();
        let retry = gateway
            .ingest(scan("AA11", "A1", now), now + Duration::seconds(2))
            .await
            .unwrap();

        assert_eq!(first, retry);
        assert!(matches!(retry, ScanOutcome::Entry { .. }));
        assert_eq!(store.recent_records("E1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tag_is_logged_not_recorded() {
        let policy = AttendancePolicy::default();
        let (gateway, store) = gateway(Arc::new(directory_with(&[("E1", "AA11")])), policy);
        let now = at(12, 0, 0);

        let outcome = gateway.ingest(scan("UNKNOWN123", "A1", now), now).await.unwrap();

        assert_eq!(outcome, ScanOutcome::UnknownTagLogged);
        assert!(store.open_records(None).await.unwrap().is_empty());
        assert_eq!(store.list_unknown_tags(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn directory_outage_is_retryable_and_not_cached() {
        let policy = AttendancePolicy {
            upstream_timeout: std::time::Duration::from_millis(50),
            ..AttendancePolicy::default()
        };
        let (gateway, store) = gateway(Arc::new(DownDirectory), policy);
        let now = at(12, 0, 0);

        let err = gateway.ingest(scan("AA11", "A1", now), now).await.unwrap_err();

        assert!(matches!(err, AttendanceError::DirectoryUnavailable { .. }));
        assert!(err.is_retryable());
        assert!(store.list_unknown_tags(10).await.unwrap().is_empty());
        // the failure is not replayed: a retry reaches the directory again
        let again = gateway.ingest(scan("AA11", "A1", now), now).await.unwrap_err();
        assert!(matches!(again, AttendanceError::DirectoryUnavailable { .. }));
    }
}
