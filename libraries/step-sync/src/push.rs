//! Keeping backend push registrations in line with the device token, the player's credentials
//! and their notification preferences.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Platform;
use crate::api::{PushTokenRequest, RegistrationApi};
use crate::credentials::CredentialStore;
use crate::device::DeviceIdentity;
use crate::profile::ProfileStore;
use crate::store::{SharedStore, StoreError};

const PUSH_TOKEN: &str = "push_token";

/// Supplies the current push token when the caller does not pass one.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    async fn current_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: usize,
    pub unregistered: usize,
    pub failed: usize,
}

pub struct PushTokenReconciler {
    api: Arc<dyn RegistrationApi>,
    provider: Option<Arc<dyn PushTokenProvider>>,
    store: SharedStore,
    profiles: ProfileStore,
    credentials: CredentialStore,
    device: DeviceIdentity,
    platform: Platform,
    sandbox: bool,
}

impl PushTokenReconciler {
    pub fn new(
        api: Arc<dyn RegistrationApi>,
        store: SharedStore,
        device: DeviceIdentity,
        platform: Platform,
        sandbox: bool,
    ) -> Self {
        Self {
            api,
            provider: None,
            profiles: ProfileStore::new(store.clone()),
            credentials: CredentialStore::new(store.clone()),
            store,
            device,
            platform,
            sandbox,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn PushTokenProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn last_known_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get_string(PUSH_TOKEN)
    }

    /// Bring every selected server's registration up to date.
    ///
    /// With notifications off the device is unregistered everywhere. Otherwise a rotated token
    /// is first unregistered, then each server is registered or unregistered according to its
    /// admin-updates preference. The token is remembered only after every server was tried.
    pub async fn reconcile(
        &self,
        new_token: Option<&str>,
        notifications_enabled: bool,
    ) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();
        let profile = self.profiles.profile()?;
        let Some(username) = profile.username() else {
            return Ok(report);
        };
        let mut targets = Vec::new();
        for server in &profile.selected_servers {
            if let Some(key) = self.credentials.get(username, server)? {
                targets.push((server.clone(), key));
            }
        }

        if !notifications_enabled {
            for (server, key) in &targets {
                self.unregister(server, key, None, &mut report).await;
            }
            return Ok(report);
        }

        let token = match new_token {
            Some(token) => Some(token.to_string()),
            None => match &self.provider {
                Some(provider) => provider.current_token().await,
                None => None,
            },
        };
        let Some(token) = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        else {
            log::debug!("No push token yet, nothing to reconcile");
            return Ok(report);
        };

        let previous = self
            .last_known_token()?
            .filter(|previous| !previous.trim().is_empty());
        if let Some(previous) = previous.filter(|previous| *previous != token) {
            log::info!("Push token rotated, dropping the old registration");
            for (server, key) in &targets {
                self.unregister(server, key, Some(&previous), &mut report)
                    .await;
            }
        }

        let prefs = self.profiles.preferences()?;
        for (server, key) in &targets {
            if prefs.admin_push_enabled(server) {
                let request = self.request(server, key, Some(&token));
                match self.api.register_push_token(&request).await {
                    Ok(()) => report.registered += 1,
                    Err(e) => {
                        log::error!("Push token sync failed for {server}: {e}");
                        report.failed += 1;
                    }
                }
            } else {
                self.unregister(server, key, None, &mut report).await;
            }
        }

        self.store.set_string(PUSH_TOKEN, token)?;
        Ok(report)
    }

    /// Re-run [`PushTokenReconciler::reconcile`] with the remembered token, so keys minted since
    /// the last pass get registered too. Without a remembered token the provider is asked.
    pub async fn refresh(&self, notifications_enabled: bool) -> Result<ReconcileReport, StoreError> {
        let token = self.last_known_token()?;
        self.reconcile(token.as_deref(), notifications_enabled).await
    }

    async fn unregister(
        &self,
        server: &str,
        key: &str,
        token: Option<&str>,
        report: &mut ReconcileReport,
    ) {
        let request = self.request(server, key, token);
        match self.api.unregister_push_token(&request).await {
            Ok(()) => report.unregistered += 1,
            Err(e) => {
                log::warn!("Push unregistration failed for {server}: {e}");
                report.failed += 1;
            }
        }
    }

    fn request(&self, server: &str, key: &str, token: Option<&str>) -> PushTokenRequest {
        PushTokenRequest {
            server: server.to_string(),
            credential: key.to_string(),
            device_id: self.device.device_id.clone(),
            platform: self.platform,
            token: token.map(str::to_string),
            sandbox: self.sandbox,
        }
    }
}
