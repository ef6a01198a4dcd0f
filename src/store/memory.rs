use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::attendance::transition::LedgerWrite;
use crate::error::StoreError;
use crate::model::{attendance::AttendanceRecord, unknown_rfid::UnknownTagEvent};
use crate::store::{AttendanceStore, Committed};

/// Process-local store. Each employee's records live in their own shard
/// entry, so writes for different employees do not contend on one lock.
#[derive(Debug)]
pub struct InMemoryStore {
    ledgers: DashMap<String, Vec<AttendanceRecord>>,
    unknown: DashMap<String, Vec<UnknownTagEvent>>,
    next_id: AtomicU64,
    next_unknown_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            ledgers: DashMap::new(),
            unknown: DashMap::new(),
            next_id: AtomicU64::new(1),
            next_unknown_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conflict(employee_id: &str) -> StoreError {
        StoreError::Conflict {
            employee_id: employee_id.to_owned(),
        }
    }
}

#[async_trait]
impl AttendanceStore for InMemoryStore {
    async fn find_open_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .ledgers
            .get(employee_id)
            .and_then(|records| records.iter().find(|r| r.is_open()).cloned()))
    }

    async fn find_latest_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .ledgers
            .get(employee_id)
            .and_then(|records| records.last().cloned()))
    }

    async fn commit(&self, write: &LedgerWrite) -> Result<Committed, StoreError> {
        let employee_id = write.employee_id();
        let mut records = self.ledgers.entry(employee_id.to_owned()).or_default();

        // validate everything before touching anything
        let close_at = match &write.close {
            Some(closed) => {
                let index = records
                    .iter()
                    .position(|r| r.id == closed.id && r.is_open())
                    .ok_or_else(|| Self::conflict(employee_id))?;
                if closed.exit_time.is_none() {
                    return Err(StoreError::unavailable("close without an exit time"));
                }
                Some(index)
            }
            None => None,
        };
        if write.open.is_some() {
            let still_open = records
                .iter()
                .enumerate()
                .any(|(index, r)| r.is_open() && Some(index) != close_at);
            if still_open {
                return Err(Self::conflict(employee_id));
            }
        }

        let mut committed = Committed::default();
        if let (Some(index), Some(closed)) = (close_at, &write.close) {
            records[index] = closed.clone();
            committed.closed = Some(closed.clone());
        }
        if let Some(opening) = &write.open {
            let record = AttendanceRecord {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                employee_id: opening.employee_id.clone(),
                block: opening.block.clone(),
                entry_time: opening.entry_time,
                exit_time: None,
                duration_secs: None,
                needs_review: opening.needs_review,
                stale: false,
            };
            records.push(record.clone());
            committed.opened = Some(record);
        }
        Ok(committed)
    }

    async fn open_records(&self, block: Option<&str>) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut open: Vec<AttendanceRecord> = self
            .ledgers
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.is_open() && block.is_none_or(|b| r.block == b))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        open.sort_by(|a, b| a.entry_time.cmp(&b.entry_time).then(a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn recent_records(
        &self,
        employee_id: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .ledgers
            .get(employee_id)
            .map(|records| records.iter().rev().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn touch_unknown_tag(
        &self,
        tag: &str,
        block: &str,
        seen_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<UnknownTagEvent, StoreError> {
        let mut sightings = self.unknown.entry(tag.to_owned()).or_default();

        if let Some(last) = sightings.last_mut() {
            if seen_at - last.last_seen <= cooldown {
                last.last_seen = last.last_seen.max(seen_at);
                last.hits += 1;
                return Ok(last.clone());
            }
        }

        let event = UnknownTagEvent {
            id: self.next_unknown_id.fetch_add(1, Ordering::Relaxed),
            tag: tag.to_owned(),
            block: block.to_owned(),
            first_seen: seen_at,
            last_seen: seen_at,
            hits: 1,
        };
        sightings.push(event.clone());
        Ok(event)
    }

    async fn list_unknown_tags(&self, limit: u32) -> Result<Vec<UnknownTagEvent>, StoreError> {
        let mut all: Vec<UnknownTagEvent> = self
            .unknown
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(b.id.cmp(&a.id)));
        all.truncate(limit as usize);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::transition::Opening;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
    }

    fn opening(employee_id: &str, block: &str, entry: DateTime<Utc>) -> LedgerWrite {
        LedgerWrite {
            close: None,
            open: Some(Opening {
                employee_id: employee_id.into(),
                block: block.into(),
                entry_time: entry,
                needs_review: false,
            }),
        }
    }

    #[tokio::test]
    async fn second_open_record_is_a_conflict() {
        let store = InMemoryStore::new();
        store.commit(&opening("E1", "A1", at(9, 0))).await.unwrap();

        let err = store.commit(&opening("E1", "A1", at(10, 0))).await.unwrap_err();

        assert_eq!(err, StoreError::Conflict { employee_id: "E1".into() });
        assert_eq!(store.open_records(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closing_an_already_closed_record_changes_nothing() {
        let store = InMemoryStore::new();
        let opened = store
            .commit(&opening("E1", "A1", at(9, 0)))
            .await
            .unwrap()
            .opened
            .unwrap();
        let closed = AttendanceRecord {
            exit_time: Some(at(17, 0)),
            duration_secs: Some(8 * 3600),
            ..opened
        };
        let close = LedgerWrite {
            close: Some(closed.clone()),
            open: None,
        };
        store.commit(&close).await.unwrap();

        // a failed supersede must not insert its opening half either
        let replay = LedgerWrite {
            close: Some(closed),
            open: opening("E1", "B2", at(18, 0)).open,
        };
        assert!(store.commit(&replay).await.is_err());
        assert!(store.find_open_record("E1").await.unwrap().is_none());
        assert_eq!(store.recent_records("E1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tag_updates_inside_cooldown_and_appends_after() {
        let store = InMemoryStore::new();
        let cooldown = Duration::minutes(10);

        let first = store.touch_unknown_tag("UNKNOWN123", "A1", at(9, 0), cooldown).await.unwrap();
        let again = store.touch_unknown_tag("UNKNOWN123", "B2", at(9, 5), cooldown).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.hits, 2);
        assert_eq!(again.last_seen, at(9, 5));
        assert_eq!(again.block, "A1");

        let later = store.touch_unknown_tag("UNKNOWN123", "A1", at(9, 30), cooldown).await.unwrap();
        assert_ne!(later.id, first.id);

        let listed = store.list_unknown_tags(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, later.id);
    }
}
