//! Reading trusted step totals from the platform health store.
//!
//! Rewards depend on steps being walked, not typed in. Before summing, every raw record goes
//! through a [`TrustFilter`]:
//! - manual entries are rejected;
//! - actively recorded sessions are rejected too, since a retroactively logged "workout" is
//!   indistinguishable from a manual entry;
//! - records with an unknown recording method are accepted, because hardware often reports
//!   real steps that way;
//! - when an allow-list of source apps is configured, other apps are rejected.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::ProfileStore;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("Health data source is unavailable")]
    SourceUnavailable,
    #[error("Permission to read steps was denied")]
    PermissionDenied,
    #[error("No step data for this window")]
    NoData,
    #[error("Health data read failed: {0}")]
    Source(String),
}

impl From<StoreError> for HealthError {
    fn from(e: StoreError) -> Self {
        HealthError::Source(e.to_string())
    }
}

/// How a record was produced, as tagged by the health platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMethod {
    Unknown,
    AutomaticallyRecorded,
    ManualEntry,
    ActivelyRecorded,
}

impl RecordingMethod {
    /// Health Connect's integer recording-method codes.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => RecordingMethod::AutomaticallyRecorded,
            2 => RecordingMethod::ManualEntry,
            3 => RecordingMethod::ActivelyRecorded,
            _ => RecordingMethod::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepDataSource {
    #[serde(rename = "healthkit")]
    HealthKit,
    #[serde(rename = "health_connect")]
    HealthConnect,
}

impl StepDataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepDataSource::HealthKit => "healthkit",
            StepDataSource::HealthConnect => "health_connect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub count: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub recording_method: RecordingMethod,
    /// Package name or bundle ID of the app that wrote the record.
    pub source_app: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Denied,
    /// The health platform is missing or not set up on this device.
    Unavailable,
}

/// Platform health-store adapter.
#[async_trait]
pub trait HealthSource: Send + Sync {
    fn kind(&self) -> StepDataSource;

    async fn authorization(&self) -> Authorization;

    /// Raw step records overlapping `[start, end)`.
    async fn read_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StepRecord>, HealthError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Trusted,
    RejectedMethod,
    RejectedSource,
}

#[derive(Debug, Clone, Default)]
pub struct TrustFilter {
    allowed_sources: BTreeSet<String>,
}

impl TrustFilter {
    pub fn new(allowed_sources: BTreeSet<String>) -> Self {
        Self { allowed_sources }
    }

    pub fn judge(&self, record: &StepRecord) -> Verdict {
        match record.recording_method {
            RecordingMethod::ManualEntry | RecordingMethod::ActivelyRecorded => {
                return Verdict::RejectedMethod;
            }
            RecordingMethod::Unknown | RecordingMethod::AutomaticallyRecorded => {}
        }
        if !self.allowed_sources.is_empty() && !self.allowed_sources.contains(&record.source_app)
        {
            return Verdict::RejectedSource;
        }
        Verdict::Trusted
    }

    pub fn trusted_sum<'a>(&self, records: impl IntoIterator<Item = &'a StepRecord>) -> i64 {
        records
            .into_iter()
            .filter(|record| self.judge(record) == Verdict::Trusted)
            .map(|record| record.count.max(0))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReading {
    pub total_steps: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub source: StepDataSource,
    /// Apps whose records were dropped only because they are not on the allow-list.
    pub blocked_sources: Vec<String>,
}

/// Device-local midnight up to `now`.
pub fn today_window(now: DateTime<Utc>, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(&offset);
    let start = local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(offset).single())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now);
    (start, now)
}

#[derive(Clone)]
pub struct StepReader {
    source: Arc<dyn HealthSource>,
    profiles: ProfileStore,
}

impl StepReader {
    pub fn new(source: Arc<dyn HealthSource>, profiles: ProfileStore) -> Self {
        Self { source, profiles }
    }

    pub fn kind(&self) -> StepDataSource {
        self.source.kind()
    }

    pub async fn read_steps_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<StepReading, HealthError> {
        match self.source.authorization().await {
            Authorization::Authorized => {}
            Authorization::Denied => return Err(HealthError::PermissionDenied),
            Authorization::Unavailable => return Err(HealthError::SourceUnavailable),
        }

        let records = self.source.read_records(start, end).await?;
        if records.is_empty() {
            return Err(HealthError::NoData);
        }

        let mut allowed = self.profiles.preferences()?.allowed_step_sources;
        if allowed.is_empty() {
            // A single app writing steps becomes the trusted source, so a second app showing up
            // later cannot add steps without the player noticing.
            let mut sources: BTreeSet<&str> = records
                .iter()
                .map(|record| record.source_app.as_str())
                .filter(|app| !app.is_empty())
                .collect();
            if let (1, Some(only)) = (sources.len(), sources.pop_first()) {
                log::info!("Adopting {only} as the trusted step source");
                allowed.insert(only.to_string());
                let adopted = allowed.clone();
                self.profiles
                    .update_preferences(|prefs| prefs.allowed_step_sources = adopted)?;
            }
        }

        let filter = TrustFilter::new(allowed);
        let mut blocked_sources = Vec::new();
        for record in &records {
            if filter.judge(record) == Verdict::RejectedSource
                && !blocked_sources.contains(&record.source_app)
            {
                blocked_sources.push(record.source_app.clone());
            }
        }
        let total_steps = filter.trusted_sum(&records);
        log::debug!(
            "Read {} records, {total_steps} trusted steps, {} blocked sources",
            records.len(),
            blocked_sources.len()
        );

        Ok(StepReading {
            total_steps,
            window_start: start,
            window_end: end,
            source: self.source.kind(),
            blocked_sources,
        })
    }
}
