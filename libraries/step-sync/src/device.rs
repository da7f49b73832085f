use crate::Platform;
use crate::store::{SharedStore, StoreError};

const DEVICE_ID: &str = "device_id";

/// The install's stable identity, sent with every registration and ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
}

impl DeviceIdentity {
    /// Load the persisted device ID, creating it on first launch.
    ///
    /// A stable platform identifier is preferred when the host has one; otherwise a random
    /// token is generated. Either way it is persisted and never regenerated afterwards.
    pub fn load_or_create(
        store: &SharedStore,
        platform: Platform,
        stable_id: Option<&str>,
    ) -> Result<Self, StoreError> {
        if let Some(existing) = store.get_string(DEVICE_ID)? {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(Self {
                    device_id: existing.to_string(),
                });
            }
        }

        let device_id = match stable_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => format!("{}-{id}", platform.as_str()),
            None => format!("dev-{}", uuid::Uuid::new_v4()),
        };
        log::info!("Created device id {device_id}");
        store.set_string(DEVICE_ID, device_id.clone())?;
        Ok(Self { device_id })
    }

    /// Drop the persisted ID and mint a fresh random one.
    /// Callers must also clear cached credentials, which were issued to the old device.
    pub fn reset(store: &SharedStore) -> Result<Self, StoreError> {
        let device_id = format!("dev-{}", uuid::Uuid::new_v4());
        log::warn!("Resetting device id to {device_id}");
        store.set_string(DEVICE_ID, device_id.clone())?;
        Ok(Self { device_id })
    }
}
