//! The capped history of sync attempts shown to the player.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::Preferences;
use crate::store::{SharedStore, StoreError};

const SYNC_LOG: &str = "sync_log";
const LAST_KNOWN_STEPS: &str = "last_known_steps";

/// What started a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Auto,
    Background,
}

impl SyncTrigger {
    /// Manual syncs always run. The others follow their preference toggle.
    pub fn enabled_by(&self, prefs: &Preferences) -> bool {
        match self {
            SyncTrigger::Manual => true,
            SyncTrigger::Auto => prefs.auto_sync_enabled,
            SyncTrigger::Background => prefs.background_sync_enabled,
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Auto => "auto",
            SyncTrigger::Background => "background",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub timestamp: DateTime<Utc>,
    pub steps: i64,
    pub source: SyncTrigger,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct LastKnownSteps {
    steps: i64,
    day: NaiveDate,
}

#[derive(Clone)]
pub struct SyncLog {
    store: SharedStore,
    capacity: usize,
}

impl SyncLog {
    pub fn new(store: SharedStore, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    /// Insert at the front, evicting the oldest entries past capacity.
    pub fn append(&self, entry: SyncLogEntry) -> Result<(), StoreError> {
        let capacity = self.capacity;
        self.store
            .update_json(SYNC_LOG, |entries: &mut Vec<SyncLogEntry>| {
                entries.insert(0, entry);
                entries.truncate(capacity);
            })
    }

    /// Newest first.
    pub fn entries(&self) -> Result<Vec<SyncLogEntry>, StoreError> {
        Ok(self.store.read_json(SYNC_LOG)?.unwrap_or_default())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(SYNC_LOG)
    }

    pub fn record_last_known_steps(&self, steps: i64, day: NaiveDate) -> Result<(), StoreError> {
        self.store
            .write_json(LAST_KNOWN_STEPS, &LastKnownSteps { steps, day })
    }

    /// The last total read on `today`. A total from an earlier day is stale and not returned.
    pub fn last_known_steps(&self, today: NaiveDate) -> Result<Option<i64>, StoreError> {
        let cached: Option<LastKnownSteps> = self.store.read_json(LAST_KNOWN_STEPS)?;
        Ok(cached.filter(|c| c.day == today).map(|c| c.steps))
    }
}
