//! One sync attempt across every selected server.
//!
//! Steps are read exactly once and the same total goes to every server, one server at a time.
//! A failing server never stops the others, and every attempt that gets as far as having a
//! configured player writes exactly one [`SyncLogEntry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::time::Instant;

use crate::SyncError;
use crate::api::{ApiError, IngestRequest, RegistrationApi};
use crate::clock::{Clock, local_day};
use crate::config::EngineConfig;
use crate::credentials::CredentialStore;
use crate::device::DeviceIdentity;
use crate::health::{HealthError, HealthSource, StepReader, StepReading, today_window};
use crate::identity::IdentityPolicy;
use crate::milestones::{MilestoneNotifier, Notifier};
use crate::profile::ProfileStore;
use crate::push::PushTokenReconciler;
use crate::store::{SharedStore, StoreError};
use crate::sync_log::{SyncLog, SyncLogEntry, SyncTrigger};

const SERVER_REMOVED_MESSAGE: &str = "Removed from app because it no longer exists on the backend.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// In selection order.
    pub success_servers: Vec<String>,
    /// Server -> reason.
    pub failed_servers: BTreeMap<String, String>,
    /// Servers the backend no longer knows. They were dropped from the selection.
    pub removed_servers: Vec<String>,
    pub steps: i64,
    /// The trigger's preference was off. Nothing was read, sent or logged.
    pub skipped: bool,
    /// No step records yet today. Nothing was sent or logged.
    pub no_step_data: bool,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        !self.success_servers.is_empty()
    }
}

const CANCELLED: &str = "Cancelled";

/// Build the single log line for an attempt. `failures` keeps selection order; servers sharing a
/// reason are grouped.
pub fn summarize(successes: &[String], failures: &[(String, String)], removed: &[String]) -> String {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for (server, reason) in failures {
        match groups.iter_mut().find(|(r, _)| *r == reason.as_str()) {
            Some((_, servers)) => servers.push(server.as_str()),
            None => groups.push((reason.as_str(), vec![server.as_str()])),
        }
    }

    let success = (!successes.is_empty()).then(|| format!("Synced to {}", successes.join(", ")));
    let failure = (!groups.is_empty()).then(|| {
        groups
            .iter()
            .map(|(reason, servers)| format!("Failed for {}: {reason}", servers.join(", ")))
            .collect::<Vec<_>>()
            .join(" | ")
    });
    let removal = (!removed.is_empty()).then(|| format!("Removed from app: {}", removed.join(", ")));

    let parts: Vec<String> = [success, failure, removal]
        .into_iter()
        .flatten()
        .collect();
    match parts.len() {
        0 => "Unknown failure".to_string(),
        1 => parts.concat(),
        _ => format!("Partial: {}", parts.join(" | ")),
    }
}

pub struct SyncOrchestrator {
    config: EngineConfig,
    device: DeviceIdentity,
    api: Arc<dyn RegistrationApi>,
    reader: StepReader,
    clock: Arc<dyn Clock>,
    profiles: ProfileStore,
    credentials: CredentialStore,
    identity: IdentityPolicy,
    log: SyncLog,
    store: SharedStore,
    milestones: Option<MilestoneNotifier>,
    push: Option<PushTokenReconciler>,
}

impl SyncOrchestrator {
    pub fn new(
        config: EngineConfig,
        store: SharedStore,
        device: DeviceIdentity,
        api: Arc<dyn RegistrationApi>,
        health: Arc<dyn HealthSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let profiles = ProfileStore::new(store.clone());
        Self {
            identity: IdentityPolicy::new(profiles.clone(), clock.clone(), config.reference_zone),
            log: SyncLog::new(store.clone(), config.log_capacity),
            reader: StepReader::new(health, profiles.clone()),
            credentials: CredentialStore::new(store.clone()),
            store,
            profiles,
            config,
            device,
            api,
            clock,
            milestones: None,
            push: None,
        }
    }

    /// Raise milestone and server-removal notifications through `notifier` after each sync.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.milestones = Some(MilestoneNotifier::new(
            self.api.clone(),
            notifier,
            self.store.clone(),
        ));
        self
    }

    /// Refresh push registrations after each attempt that reached the servers. Keys minted during
    /// the attempt get the remembered token.
    pub fn with_push(mut self, reconciler: PushTokenReconciler) -> Self {
        self.push = Some(reconciler);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn identity(&self) -> &IdentityPolicy {
        &self.identity
    }

    pub fn sync_log(&self) -> Result<Vec<SyncLogEntry>, StoreError> {
        self.log.entries()
    }

    /// Today's total from the last successful step read, if it was read today.
    pub fn last_known_steps(&self) -> Result<Option<i64>, StoreError> {
        self.log.last_known_steps(self.today_local())
    }

    pub async fn sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome, SyncError> {
        self.run(trigger, None).await
    }

    /// Like [`SyncOrchestrator::sync`], but servers still in flight at `deadline` are recorded as
    /// cancelled. Servers that already finished keep their result.
    pub async fn sync_with_deadline(
        &self,
        trigger: SyncTrigger,
        deadline: Instant,
    ) -> Result<SyncOutcome, SyncError> {
        self.run(trigger, Some(deadline)).await
    }

    /// Resolve the player's key for `server` right away, as onboarding does after a server is
    /// picked. Invite codes must be stored beforehand.
    pub async fn ensure_credential(&self, server: &str) -> Result<String, SyncError> {
        let profile = self.profiles.profile()?;
        let Some(username) = profile.username() else {
            return Err(SyncError::NotConfigured(
                "Minecraft username not set".to_string(),
            ));
        };
        self.resolve_credential(username, server).await
    }

    fn today_local(&self) -> NaiveDate {
        local_day(self.clock.now(), self.clock.local_offset())
    }

    async fn run(
        &self,
        trigger: SyncTrigger,
        deadline: Option<Instant>,
    ) -> Result<SyncOutcome, SyncError> {
        if !trigger.enabled_by(&self.profiles.preferences()?) {
            log::debug!("Skipping {trigger} sync, disabled in preferences");
            return Ok(SyncOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        self.identity.apply_queued_if_due()?;

        let profile = self.profiles.profile()?;
        let username = match profile.username() {
            Some(username) if !profile.selected_servers.is_empty() => username.to_string(),
            Some(_) => return Err(self.not_configured(trigger, "No servers selected")?),
            None => return Err(self.not_configured(trigger, "Minecraft username not set")?),
        };

        let now = self.clock.now();
        let offset = self.clock.local_offset();
        let (start, end) = today_window(now, offset);
        let reading = match self.reader.read_steps_for_window(start, end).await {
            Ok(reading) => reading,
            Err(HealthError::NoData) => {
                log::debug!("No step records yet today, nothing to sync");
                return Ok(SyncOutcome {
                    no_step_data: true,
                    ..Default::default()
                });
            }
            Err(e) => {
                log::warn!("Reading steps failed: {e}");
                self.append(trigger, 0, false, e.to_string())?;
                return Err(e.into());
            }
        };
        let day = local_day(now, offset);
        self.log.record_last_known_steps(reading.total_steps, day)?;
        if !reading.blocked_sources.is_empty() {
            log::warn!(
                "Ignored steps from untrusted sources: {}",
                reading.blocked_sources.join(", ")
            );
        }

        let mut outcome = SyncOutcome {
            steps: reading.total_steps,
            ..Default::default()
        };
        let mut failures: Vec<(String, String)> = Vec::new();

        for server in &profile.selected_servers {
            let work = self.sync_server(server, &username, &reading, day);
            let result = match deadline {
                Some(deadline) if Instant::now() >= deadline => None,
                Some(deadline) => tokio::time::timeout_at(deadline, work).await.ok(),
                None => Some(work.await),
            };

            match result {
                None => {
                    log::warn!("Sync to {server} cancelled, out of time");
                    failures.push((server.clone(), CANCELLED.to_string()));
                }
                Some(Ok(())) => {
                    log::info!("Synced {} steps to {server}", reading.total_steps);
                    outcome.success_servers.push(server.clone());
                }
                Some(Err(SyncError::Api(ApiError::ServerNotFound))) => {
                    match self.remove_server(server).await {
                        Ok(()) => outcome.removed_servers.push(server.clone()),
                        Err(e) => failures.push((server.clone(), e.to_string())),
                    }
                }
                Some(Err(failure)) => {
                    log::warn!("Sync to {server} failed: {failure}");
                    failures.push((server.clone(), failure.to_string()));
                }
            }
        }

        let message = summarize(&outcome.success_servers, &failures, &outcome.removed_servers);
        self.append(trigger, reading.total_steps, outcome.is_success(), message)?;
        outcome.failed_servers = failures.into_iter().collect();

        if let Some(milestones) = self.milestones.as_ref().filter(|_| outcome.is_success()) {
            if let Err(e) = milestones
                .check(
                    &self.device.device_id,
                    &username,
                    &outcome.success_servers,
                    reading.total_steps,
                    self.identity.today(),
                )
                .await
            {
                log::error!("Milestone check failed: {e}");
            }
        }

        if let Some(push) = &self.push {
            let notifications_enabled = self
                .milestones
                .as_ref()
                .is_none_or(|m| m.notifier().notifications_enabled());
            match push.refresh(notifications_enabled).await {
                Ok(report) => log::debug!(
                    "Push refresh: {} registered, {} unregistered, {} failed",
                    report.registered,
                    report.unregistered,
                    report.failed
                ),
                Err(e) => log::error!("Push refresh failed: {e}"),
            }
        }

        Ok(outcome)
    }

    fn not_configured(&self, trigger: SyncTrigger, reason: &str) -> Result<SyncError, StoreError> {
        log::warn!("Sync not possible: {reason}");
        self.append(trigger, 0, false, format!("Not configured: {reason}"))?;
        Ok(SyncError::NotConfigured(reason.to_string()))
    }

    fn append(
        &self,
        trigger: SyncTrigger,
        steps: i64,
        success: bool,
        message: String,
    ) -> Result<(), StoreError> {
        self.log.append(SyncLogEntry {
            timestamp: self.clock.now(),
            steps,
            source: trigger,
            success,
            message,
        })
    }

    async fn sync_server(
        &self,
        server: &str,
        username: &str,
        reading: &StepReading,
        day: NaiveDate,
    ) -> Result<(), SyncError> {
        let request = |credential: String| IngestRequest {
            server: server.to_string(),
            credential,
            username: username.to_string(),
            device_id: self.device.device_id.clone(),
            steps: reading.total_steps,
            day,
            timestamp: self.clock.now(),
            source: reading.source,
        };

        let credential = self.resolve_credential(username, server).await?;
        match self.api.ingest(&request(credential)).await {
            Ok(_) => Ok(()),
            Err(ApiError::Unauthorized) => {
                log::warn!("Key for {username} on {server} was rejected, fetching a new one");
                self.credentials.remove(username, server)?;
                let credential = self.obtain_credential(username, server).await?;
                self.api.ingest(&request(credential)).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The cached key for `(username, server)`, or a freshly obtained one. Read from the store
    /// every time, never carried across attempts.
    async fn resolve_credential(&self, username: &str, server: &str) -> Result<String, SyncError> {
        if let Some(key) = self.credentials.get(username, server)? {
            return Ok(key);
        }
        self.obtain_credential(username, server).await
    }

    /// Recover the key this device was issued before, else register.
    async fn obtain_credential(&self, username: &str, server: &str) -> Result<String, SyncError> {
        let device_id = &self.device.device_id;
        let key = match self.api.recover_credential(device_id, username, server).await {
            Ok(key) => key,
            Err(e) => {
                log::debug!("No key to recover for {username} on {server} ({e}), registering");
                let invite_code = self.credentials.invite_code(server)?;
                self.api
                    .register(device_id, username, server, invite_code.as_deref())
                    .await?
            }
        };
        self.credentials.put(username, server, &key)?;
        Ok(key)
    }

    async fn remove_server(&self, server: &str) -> Result<(), StoreError> {
        log::warn!("{server} no longer exists on the backend, removing it");
        self.profiles.deselect_server(server, &self.credentials)?;
        if let Some(milestones) = &self.milestones {
            let notifier = milestones.notifier();
            if notifier.notifications_enabled() {
                notifier.notify(server, SERVER_REMOVED_MESSAGE).await;
            }
        }
        Ok(())
    }
}
