//! Live per-block headcount derived from the ledger's open records.
//!
//! The tracker is a cache keyed by `(block, employee_id)`. It only changes
//! through deltas produced by a committed ledger transition, or through a
//! full recompute from the store. Counts are the size of each block's
//! occupant set, so replaying a delta can never over- or under-count.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::attendance::AttendanceRecord;

/// Change to one block caused by a ledger transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccupancyDelta {
    Enter {
        block: String,
        employee_id: String,
        entry_time: DateTime<Utc>,
    },
    Leave {
        block: String,
        employee_id: String,
    },
}

impl OccupancyDelta {
    pub fn block(&self) -> &str {
        match self {
            OccupancyDelta::Enter { block, .. } | OccupancyDelta::Leave { block, .. } => block,
        }
    }

    /// +1 for an opened record, -1 for a closed one.
    pub fn sign(&self) -> i32 {
        match self {
            OccupancyDelta::Enter { .. } => 1,
            OccupancyDelta::Leave { .. } => -1,
        }
    }

    pub fn opened(record: &AttendanceRecord) -> Self {
        OccupancyDelta::Enter {
            block: record.block.clone(),
            employee_id: record.employee_id.clone(),
            entry_time: record.entry_time,
        }
    }

    pub fn closed(record: &AttendanceRecord) -> Self {
        OccupancyDelta::Leave {
            block: record.block.clone(),
            employee_id: record.employee_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
pub struct OccupancyCount {
    /// Open records younger than the maximum session length.
    pub present: usize,
    /// Open records past the maximum session length.
    pub stale: usize,
}

impl OccupancyCount {
    /// Every open record in the block, stale or not.
    pub fn open(&self) -> usize {
        self.present + self.stale
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Occupant {
    pub employee_id: String,
    #[schema(value_type = String, format = "date-time")]
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BlockSummary {
    #[schema(example = "A1")]
    pub block: String,
    #[schema(example = 12)]
    pub count: usize,
    #[schema(example = 0)]
    pub stale: usize,
}

#[derive(Debug, Default)]
struct TrackerState {
    blocks: HashMap<String, HashMap<String, DateTime<Utc>>>,
    /// Bumped on every applied transition.
    version: u64,
}

#[derive(Debug)]
pub struct OccupancyTracker {
    state: RwLock<TrackerState>,
    max_session: Duration,
}

impl OccupancyTracker {
    pub fn new(max_session: Duration) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            max_session,
        }
    }

    /// Apply every delta of one ledger transition under a single write lock,
    /// so readers see either none or all of them.
    pub fn apply(&self, deltas: &[OccupancyDelta]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        for delta in deltas {
            tracing::trace!(
                block = delta.block(),
                change = delta.sign(),
                "Applying occupancy delta"
            );
            match delta {
                OccupancyDelta::Enter {
                    block,
                    employee_id,
                    entry_time,
                } => {
                    state
                        .blocks
                        .entry(block.clone())
                        .or_default()
                        .insert(employee_id.clone(), *entry_time);
                }
                OccupancyDelta::Leave { block, employee_id } => {
                    let removed = state
                        .blocks
                        .get_mut(block)
                        .and_then(|occupants| occupants.remove(employee_id));
                    if removed.is_none() {
                        tracing::warn!(
                            %block,
                            %employee_id,
                            "Leave delta for an occupant the tracker never saw"
                        );
                    }
                    if state.blocks.get(block).is_some_and(HashMap::is_empty) {
                        state.blocks.remove(block);
                    }
                }
            }
        }
        state.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).version
    }

    /// Number of open records in `block`, stale ones included.
    pub fn open_count(&self, block: &str) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .blocks
            .get(block)
            .map_or(0, HashMap::len)
    }

    pub fn current_occupancy(&self, block: &str, now: DateTime<Utc>) -> OccupancyCount {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(occupants) = state.blocks.get(block) else {
            return OccupancyCount::default();
        };
        self.count(occupants, now)
    }

    /// Employees currently present in `block`, earliest entry first.
    /// Stale-open records are left out.
    pub fn list_occupants(&self, block: &str, now: DateTime<Utc>) -> Vec<Occupant> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut occupants: Vec<Occupant> = state
            .blocks
            .get(block)
            .into_iter()
            .flatten()
            .filter(|(_, entry)| !self.is_stale(**entry, now))
            .map(|(employee_id, entry)| Occupant {
                employee_id: employee_id.clone(),
                entry_time: *entry,
            })
            .collect();
        occupants.sort_by(|a, b| {
            a.entry_time
                .cmp(&b.entry_time)
                .then_with(|| a.employee_id.cmp(&b.employee_id))
        });
        occupants
    }

    /// Every block with at least one open record, sorted by block name.
    pub fn summary(&self, now: DateTime<Utc>) -> Vec<BlockSummary> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut blocks: Vec<BlockSummary> = state
            .blocks
            .iter()
            .map(|(block, occupants)| {
                let count = self.count(occupants, now);
                BlockSummary {
                    block: block.clone(),
                    count: count.present,
                    stale: count.stale,
                }
            })
            .collect();
        blocks.sort_by(|a, b| a.block.cmp(&b.block));
        blocks
    }

    /// Replace the cache with a full recompute from `open_records`, unless a
    /// transition was applied since `seen_version` was read.
    pub fn replace_if_unchanged(
        &self,
        open_records: &[AttendanceRecord],
        seen_version: u64,
    ) -> bool {
        let mut blocks: HashMap<String, HashMap<String, DateTime<Utc>>> = HashMap::new();
        for record in open_records.iter().filter(|r| r.is_open()) {
            blocks
                .entry(record.block.clone())
                .or_default()
                .insert(record.employee_id.clone(), record.entry_time);
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.version != seen_version {
            return false;
        }
        if state.blocks != blocks {
            tracing::warn!(
                cached_blocks = state.blocks.len(),
                store_blocks = blocks.len(),
                "Occupancy cache drifted from the ledger; replacing"
            );
        }
        state.blocks = blocks;
        true
    }

    fn count(
        &self,
        occupants: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> OccupancyCount {
        let stale = occupants
            .values()
            .filter(|entry| self.is_stale(**entry, now))
            .count();
        OccupancyCount {
            present: occupants.len() - stale,
            stale,
        }
    }

    fn is_stale(&self, entry_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - entry_time > self.max_session
    }
}
