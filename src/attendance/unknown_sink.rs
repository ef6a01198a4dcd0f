use std::sync::Arc;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{debug, error, warn};

use crate::attendance::policy::AttendancePolicy;
use crate::error::StoreError;
use crate::model::unknown_rfid::UnknownTagEvent;
use crate::store::AttendanceStore;

/// Collects scans of tags the directory does not know, for admin review.
pub struct UnknownTagSink {
    store: Arc<dyn AttendanceStore>,
    policy: AttendancePolicy,
    /// Tags already reported in the log during the current cooldown.
    announced: Cache<String, ()>,
}

impl UnknownTagSink {
    pub fn new(store: Arc<dyn AttendanceStore>, policy: AttendancePolicy) -> Self {
        Self {
            store,
            policy,
            announced: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(policy.unknown_tag_ttl())
                .build(),
        }
    }

    /// Record a sighting. Never fails: storage problems are logged and
    /// swallowed so the reader still gets its acknowledgement.
    pub async fn record(&self, tag: &str, block: &str, seen_at: DateTime<Utc>) {
        let write = self
            .store
            .touch_unknown_tag(tag, block, seen_at, self.policy.unknown_tag_cooldown);

        match tokio::time::timeout(self.policy.upstream_timeout, write).await {
            Ok(Ok(event)) => {
                let first_in_window = self
                    .announced
                    .entry(tag.to_owned())
                    .or_insert(())
                    .await
                    .is_fresh();
                if first_in_window {
                    warn!(tag, block, hits = event.hits, "Unknown RFID tag scanned");
                } else {
                    debug!(tag, block, hits = event.hits, "Unknown RFID tag seen again");
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, tag, block, "Failed to record unknown tag");
            }
            Err(_) => {
                error!(tag, block, "Timed out recording unknown tag");
            }
        }
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<UnknownTagEvent>, StoreError> {
        self.store.list_unknown_tags(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::test_support::helpers::{BrokenStore, at};
    use chrono::Duration;

    #[tokio::test]
    async fn repeat_sightings_inside_cooldown_share_a_row() {
        let store = Arc::new(InMemoryStore::new());
        let sink = UnknownTagSink::new(store.clone(), AttendancePolicy::default());
        let t0 = at(9, 0, 0);

        for minute in 0..5 {
            sink.record("UNKNOWN123", "A1", t0 + Duration::minutes(minute)).await;
        }

        let rows = sink.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hits, 5);
        assert_eq!(rows[0].last_seen, t0 + Duration::minutes(4));
    }

    #[tokio::test]
    async fn storage_failures_are_swallowed() {
        let sink = UnknownTagSink::new(Arc::new(BrokenStore), AttendancePolicy::default());

        // completes without panicking or returning an error
        sink.record("UNKNOWN123", "A1", Utc::now()).await;
        assert!(sink.recent(10).await.is_err());
    }
}
