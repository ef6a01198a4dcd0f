use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::MySqlPool;
use tracing::{debug, error};

use crate::attendance::transition::LedgerWrite;
use crate::error::StoreError;
use crate::model::{attendance::AttendanceRecord, unknown_rfid::UnknownTagEvent};
use crate::store::{AttendanceStore, Committed};

const RECORD_COLUMNS: &str =
    "id, employee_id, block, entry_time, exit_time, duration_secs, needs_review, stale";

const UNKNOWN_COLUMNS: &str = "id, tag, block, first_seen, last_seen, hits";

/// Ledger backed by the `attendance` and `unknown_rfids` tables.
///
/// The open-record invariant is enforced by the table itself
/// (`UNIQUE (employee_id, open_marker)`, see `db/schema.sql`); a write that
/// would break it comes back as [`StoreError::Conflict`].
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceStore for MySqlStore {
    async fn find_open_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance \
             WHERE employee_id = ? AND exit_time IS NULL LIMIT 1"
        );
        let record = sqlx::query_as::<_, AttendanceRecord>(&sql)
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_latest_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance WHERE employee_id = ? ORDER BY id DESC LIMIT 1"
        );
        let record = sqlx::query_as::<_, AttendanceRecord>(&sql)
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn commit(&self, write: &LedgerWrite) -> Result<Committed, StoreError> {
        let employee_id = write.employee_id();
        let mut tx = self.pool.begin().await?;
        let mut committed = Committed::default();

        if let Some(closed) = &write.close {
            // only an exit on a still-open row counts; anything else lost a race
            let result = sqlx::query(
                r#"
                UPDATE attendance
                SET exit_time = ?, duration_secs = ?, needs_review = ?, stale = ?
                WHERE id = ?
                AND employee_id = ?
                AND exit_time IS NULL
                "#,
            )
            .bind(closed.exit_time)
            .bind(closed.duration_secs)
            .bind(closed.needs_review)
            .bind(closed.stale)
            .bind(closed.id)
            .bind(&closed.employee_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(e, employee_id))?;

            if result.rows_affected() == 0 {
                debug!(
                    employee_id,
                    record_id = closed.id,
                    "Open record already closed by another writer"
                );
                return Err(StoreError::Conflict {
                    employee_id: employee_id.to_owned(),
                });
            }
            committed.closed = Some(closed.clone());
        }

        if let Some(opening) = &write.open {
            let result = sqlx::query(
                r#"
                INSERT INTO attendance (employee_id, block, entry_time, needs_review)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&opening.employee_id)
            .bind(&opening.block)
            .bind(opening.entry_time)
            .bind(opening.needs_review)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(e, employee_id))?;

            committed.opened = Some(AttendanceRecord {
                id: result.last_insert_id(),
                employee_id: opening.employee_id.clone(),
                block: opening.block.clone(),
                entry_time: opening.entry_time,
                exit_time: None,
                duration_secs: None,
                needs_review: opening.needs_review,
                stale: false,
            });
        }

        tx.commit().await.map_err(|e| {
            error!(error = %e, employee_id, "Ledger commit failed");
            StoreError::from_sqlx(e, employee_id)
        })?;
        Ok(committed)
    }

    async fn open_records(&self, block: Option<&str>) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = match block {
            Some(block) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance \
                     WHERE exit_time IS NULL AND block = ? ORDER BY entry_time, id"
                );
                sqlx::query_as::<_, AttendanceRecord>(&sql)
                    .bind(block)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance \
                     WHERE exit_time IS NULL ORDER BY entry_time, id"
                );
                sqlx::query_as::<_, AttendanceRecord>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    async fn recent_records(
        &self,
        employee_id: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance WHERE employee_id = ? ORDER BY id DESC LIMIT ?"
        );
        let records = sqlx::query_as::<_, AttendanceRecord>(&sql)
            .bind(employee_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn touch_unknown_tag(
        &self,
        tag: &str,
        block: &str,
        seen_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<UnknownTagEvent, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {UNKNOWN_COLUMNS} FROM unknown_rfids \
             WHERE tag = ? ORDER BY id DESC LIMIT 1 FOR UPDATE"
        );
        let last = sqlx::query_as::<_, UnknownTagEvent>(&sql)
            .bind(tag)
            .fetch_optional(&mut *tx)
            .await?;

        let event = match last {
            Some(mut last) if seen_at - last.last_seen <= cooldown => {
                last.last_seen = last.last_seen.max(seen_at);
                last.hits += 1;
                sqlx::query("UPDATE unknown_rfids SET last_seen = ?, hits = ? WHERE id = ?")
                    .bind(last.last_seen)
                    .bind(last.hits)
                    .bind(last.id)
                    .execute(&mut *tx)
                    .await?;
                last
            }
            _ => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO unknown_rfids (tag, block, first_seen, last_seen, hits)
                    VALUES (?, ?, ?, ?, 1)
                    "#,
                )
                .bind(tag)
                .bind(block)
                .bind(seen_at)
                .bind(seen_at)
                .execute(&mut *tx)
                .await?;
                UnknownTagEvent {
                    id: result.last_insert_id(),
                    tag: tag.to_owned(),
                    block: block.to_owned(),
                    first_seen: seen_at,
                    last_seen: seen_at,
                    hits: 1,
                }
            }
        };

        tx.commit().await?;
        Ok(event)
    }

    async fn list_unknown_tags(&self, limit: u32) -> Result<Vec<UnknownTagEvent>, StoreError> {
        let sql = format!(
            "SELECT {UNKNOWN_COLUMNS} FROM unknown_rfids ORDER BY last_seen DESC, id DESC LIMIT ?"
        );
        let events = sqlx::query_as::<_, UnknownTagEvent>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }
}
