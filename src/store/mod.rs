//! Persistence of the attendance ledger and of unknown-tag sightings.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::attendance::transition::LedgerWrite;
use crate::error::StoreError;
use crate::model::{attendance::AttendanceRecord, unknown_rfid::UnknownTagEvent};

/// Records touched by one committed ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Committed {
    pub closed: Option<AttendanceRecord>,
    pub opened: Option<AttendanceRecord>,
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// The employee's single record with a null exit time, if any.
    async fn find_open_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// The employee's most recently created record, open or closed.
    async fn find_latest_record(
        &self,
        employee_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Apply `write` all-or-nothing.
    ///
    /// Fails with [`StoreError::Conflict`] if the record to close is no longer
    /// open, or if opening would leave the employee with two open records.
    async fn commit(&self, write: &LedgerWrite) -> Result<Committed, StoreError>;

    /// Open records, optionally restricted to one block.
    async fn open_records(&self, block: Option<&str>) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Newest first.
    async fn recent_records(
        &self,
        employee_id: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Record a sighting of an unresolved tag. Inside `cooldown` of the tag's
    /// last sighting the existing row is updated, otherwise a new row starts.
    async fn touch_unknown_tag(
        &self,
        tag: &str,
        block: &str,
        seen_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<UnknownTagEvent, StoreError>;

    /// Newest sighting first.
    async fn list_unknown_tags(&self, limit: u32) -> Result<Vec<UnknownTagEvent>, StoreError>;
}
