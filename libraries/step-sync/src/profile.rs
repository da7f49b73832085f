//! The local player profile and sync preferences.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialStore;
use crate::store::{SharedStore, StoreError};

const PROFILE: &str = "profile";
const PREFERENCES: &str = "preferences";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProfile {
    pub minecraft_username: String,
    /// Kept in the order the player joined them; syncs walk servers in this order.
    pub selected_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_day: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_username_change_day: Option<NaiveDate>,
}

impl LocalProfile {
    pub fn username(&self) -> Option<&str> {
        let name = self.minecraft_username.trim();
        (!name.is_empty()).then_some(name)
    }

    pub fn is_configured(&self) -> bool {
        self.username().is_some() && !self.selected_servers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub auto_sync_enabled: bool,
    pub background_sync_enabled: bool,
    pub background_sync_interval_minutes: u32,
    /// Servers missing from the map receive admin push updates.
    pub admin_push_by_server: BTreeMap<String, bool>,
    pub milestone_tiers_by_server: BTreeMap<String, BTreeSet<i64>>,
    /// Health apps whose records are trusted. Empty means any app.
    pub allowed_step_sources: BTreeSet<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            background_sync_enabled: false,
            background_sync_interval_minutes: 15,
            admin_push_by_server: BTreeMap::new(),
            milestone_tiers_by_server: BTreeMap::new(),
            allowed_step_sources: BTreeSet::new(),
        }
    }
}

impl Preferences {
    pub fn admin_push_enabled(&self, server: &str) -> bool {
        self.admin_push_by_server.get(server).copied().unwrap_or(true)
    }

    pub fn milestone_tiers(&self, server: &str) -> BTreeSet<i64> {
        self.milestone_tiers_by_server
            .get(server)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct ProfileStore {
    store: SharedStore,
}

impl ProfileStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn profile(&self) -> Result<LocalProfile, StoreError> {
        Ok(self.store.read_json(PROFILE)?.unwrap_or_default())
    }

    pub fn update_profile<R>(&self, f: impl FnOnce(&mut LocalProfile) -> R) -> Result<R, StoreError> {
        self.store.update_json(PROFILE, f)
    }

    pub fn preferences(&self) -> Result<Preferences, StoreError> {
        Ok(self.store.read_json(PREFERENCES)?.unwrap_or_default())
    }

    pub fn update_preferences<R>(
        &self,
        f: impl FnOnce(&mut Preferences) -> R,
    ) -> Result<R, StoreError> {
        self.store.update_json(PREFERENCES, f)
    }

    /// Returns `false` if the server was already selected.
    pub fn select_server(&self, server: &str) -> Result<bool, StoreError> {
        let server = server.trim();
        if server.is_empty() {
            return Ok(false);
        }
        self.update_profile(|profile| {
            if profile.selected_servers.iter().any(|s| s == server) {
                false
            } else {
                profile.selected_servers.push(server.to_string());
                true
            }
        })
    }

    /// Deselect a server and invalidate everything cached for it: the current username's key
    /// and the invite code.
    pub fn deselect_server(
        &self,
        server: &str,
        credentials: &CredentialStore,
    ) -> Result<bool, StoreError> {
        let (removed, username) = self.update_profile(|profile| {
            let before = profile.selected_servers.len();
            profile.selected_servers.retain(|s| s != server);
            (
                profile.selected_servers.len() != before,
                profile.minecraft_username.clone(),
            )
        })?;
        credentials.remove(&username, server)?;
        credentials.set_invite_code(server, None)?;
        self.update_preferences(|prefs| {
            prefs.admin_push_by_server.remove(server);
            prefs.milestone_tiers_by_server.remove(server);
        })?;
        Ok(removed)
    }

    pub fn set_admin_push_enabled(&self, server: &str, enabled: bool) -> Result<(), StoreError> {
        self.update_preferences(|prefs| {
            prefs.admin_push_by_server.insert(server.to_string(), enabled);
        })
    }

    pub fn set_milestone_tier(
        &self,
        server: &str,
        min_steps: i64,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.update_preferences(|prefs| {
            let tiers = prefs
                .milestone_tiers_by_server
                .entry(server.to_string())
                .or_default();
            if enabled {
                tiers.insert(min_steps);
            } else {
                tiers.remove(&min_steps);
            }
            if tiers.is_empty() {
                prefs.milestone_tiers_by_server.remove(server);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn preferences_default_when_missing() {
        let profiles = ProfileStore::new(SharedStore::new(MemoryStore::new()));
        let prefs = profiles.preferences().unwrap();
        assert!(prefs.auto_sync_enabled);
        assert!(!prefs.background_sync_enabled);
        assert!(prefs.admin_push_enabled("Alpha"));
    }

    #[test]
    fn older_preferences_fill_new_fields() {
        let store = SharedStore::new(MemoryStore::new());
        store
            .set_string(PREFERENCES, r#"{"auto_sync_enabled": false}"#)
            .unwrap();
        let prefs = ProfileStore::new(store).preferences().unwrap();
        assert!(!prefs.auto_sync_enabled);
        assert_eq!(prefs.background_sync_interval_minutes, 15);
    }

    #[test]
    fn deselect_drops_the_servers_credential_and_invite() {
        let store = SharedStore::new(MemoryStore::new());
        let profiles = ProfileStore::new(store.clone());
        let creds = CredentialStore::new(store);

        profiles
            .update_profile(|p| p.minecraft_username = "Steve".to_string())
            .unwrap();
        assert!(profiles.select_server("Alpha").unwrap());
        assert!(profiles.select_server("Beta").unwrap());
        assert!(!profiles.select_server("Alpha").unwrap());
        creds.put("Steve", "Alpha", "k1").unwrap();
        creds.set_invite_code("Alpha", Some("abc")).unwrap();

        assert!(profiles.deselect_server("Alpha", &creds).unwrap());
        assert_eq!(profiles.profile().unwrap().selected_servers, vec!["Beta"]);
        assert_eq!(creds.get("Steve", "Alpha").unwrap(), None);
        assert_eq!(creds.invite_code("Alpha").unwrap(), None);
    }
}
