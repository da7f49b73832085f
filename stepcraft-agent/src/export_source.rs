use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use step_sync::Platform;
use step_sync::health::{Authorization, HealthError, HealthSource, StepDataSource, StepRecord};

/// A health-store export on disk: `{"records": [...]}`, one entry per step sample.
#[derive(Debug, Deserialize)]
struct Export {
    records: Vec<StepRecord>,
}

/// The permission flag alone; `records` is skipped without being decoded.
#[derive(Debug, Deserialize)]
struct Permission {
    #[serde(default = "granted")]
    permission_granted: bool,
}

fn granted() -> bool {
    true
}

/// Reads step records from a JSON export of the platform health store.
pub struct JsonExportSource {
    path: PathBuf,
    kind: StepDataSource,
}

impl JsonExportSource {
    pub fn new(path: impl Into<PathBuf>, platform: Platform) -> Self {
        let kind = match platform {
            Platform::Android => StepDataSource::HealthConnect,
            Platform::Ios => StepDataSource::HealthKit,
        };
        Self {
            path: path.into(),
            kind,
        }
    }

    /// `Ok(None)` when there is no export yet.
    async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, HealthError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HealthError::Source(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&text).map(Some).map_err(|e| {
            HealthError::Source(format!("Failed to parse {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl HealthSource for JsonExportSource {
    fn kind(&self) -> StepDataSource {
        self.kind
    }

    async fn authorization(&self) -> Authorization {
        match self.load::<Permission>().await {
            Ok(None) => Authorization::Unavailable,
            Ok(Some(permission)) if !permission.permission_granted => Authorization::Denied,
            // A malformed export surfaces as a read error instead.
            _ => Authorization::Authorized,
        }
    }

    async fn read_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StepRecord>, HealthError> {
        let Some(export) = self.load::<Export>().await? else {
            return Err(HealthError::Source(format!(
                "{} does not exist",
                self.path.display()
            )));
        };
        Ok(export
            .records
            .into_iter()
            .filter(|record| record.start < end && record.end > start)
            .collect())
    }
}
