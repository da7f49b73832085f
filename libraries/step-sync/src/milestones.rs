//! Local notifications when today's steps cross a reward tier the player asked about.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::api::RegistrationApi;
use crate::credentials::CredentialStore;
use crate::profile::ProfileStore;
use crate::store::{SharedStore, StoreError};

const MILESTONES_NOTIFIED: &str = "milestones_notified";

/// Shows notifications on the host.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn notifications_enabled(&self) -> bool;

    async fn notify(&self, server: &str, message: &str);
}

pub fn milestone_message(label: &str, min_steps: i64, server: &str) -> String {
    let label = match label.trim() {
        "" => "Milestone",
        label => label,
    };
    format!("You reached {label} ({min_steps} steps) on {server}.")
}

fn tier_key(server: &str, min_steps: i64) -> String {
    format!("{server}|{min_steps}")
}

#[derive(Clone)]
pub struct MilestoneNotifier {
    api: Arc<dyn RegistrationApi>,
    notifier: Arc<dyn Notifier>,
    profiles: ProfileStore,
    credentials: CredentialStore,
    store: SharedStore,
}

impl MilestoneNotifier {
    pub fn new(api: Arc<dyn RegistrationApi>, notifier: Arc<dyn Notifier>, store: SharedStore) -> Self {
        Self {
            api,
            notifier,
            profiles: ProfileStore::new(store.clone()),
            credentials: CredentialStore::new(store.clone()),
            store,
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Notify each configured tier on `servers` that `steps` reaches and that has not been
    /// notified on `day` yet. Returns how many notifications were raised.
    pub async fn check(
        &self,
        device_id: &str,
        username: &str,
        servers: &[String],
        steps: i64,
        day: NaiveDate,
    ) -> Result<usize, StoreError> {
        let prefs = self.profiles.preferences()?;
        if prefs.milestone_tiers_by_server.is_empty() || !self.notifier.notifications_enabled() {
            return Ok(0);
        }

        self.store
            .update_json(MILESTONES_NOTIFIED, |notified: &mut BTreeMap<String, NaiveDate>| {
                notified.retain(|_, notified_on| *notified_on == day)
            })?;

        let mut raised = 0;
        for server in servers {
            let wanted = prefs.milestone_tiers(server);
            if wanted.is_empty() {
                continue;
            }
            let Some(credential) = self.credentials.get(username, server)? else {
                continue;
            };
            let tiers = match self.api.rewards(device_id, server, &credential).await {
                Ok(tiers) => tiers,
                Err(e) => {
                    log::error!("Milestone check failed for {server}: {e}");
                    continue;
                }
            };

            for tier in tiers {
                if !wanted.contains(&tier.min_steps) || steps < tier.min_steps {
                    continue;
                }
                let key = tier_key(server, tier.min_steps);
                let first_today = self.store.update_json(
                    MILESTONES_NOTIFIED,
                    |notified: &mut BTreeMap<String, NaiveDate>| {
                        notified.insert(key.clone(), day) != Some(day)
                    },
                )?;
                if first_today {
                    let message = milestone_message(&tier.label, tier.min_steps, server);
                    log::info!("{message}");
                    self.notifier.notify(server, &message).await;
                    raised += 1;
                }
            }
        }
        Ok(raised)
    }
}
