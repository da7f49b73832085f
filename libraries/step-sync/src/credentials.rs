//! Per-(username, server) API keys and per-server invite codes.

use std::collections::BTreeMap;

use crate::store::{SharedStore, StoreError};

const SERVER_KEYS: &str = "server_keys";
const INVITE_CODES: &str = "invite_codes_by_server";

/// username -> server -> key
type KeysByUser = BTreeMap<String, BTreeMap<String, String>>;

/// Keys are always addressed by the full `(username, server)` pair, so a username change can
/// never pick up a key issued to somebody else.
#[derive(Clone)]
pub struct CredentialStore {
    store: SharedStore,
}

impl CredentialStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn get(&self, username: &str, server: &str) -> Result<Option<String>, StoreError> {
        let keys: KeysByUser = self.store.read_json(SERVER_KEYS)?.unwrap_or_default();
        Ok(keys
            .get(username)
            .and_then(|servers| servers.get(server))
            .cloned())
    }

    pub fn put(&self, username: &str, server: &str, key: &str) -> Result<(), StoreError> {
        self.store.update_json(SERVER_KEYS, |keys: &mut KeysByUser| {
            keys.entry(username.to_string())
                .or_default()
                .insert(server.to_string(), key.to_string());
        })
    }

    pub fn remove(&self, username: &str, server: &str) -> Result<(), StoreError> {
        self.store.update_json(SERVER_KEYS, |keys: &mut KeysByUser| {
            if let Some(servers) = keys.get_mut(username) {
                servers.remove(server);
                if servers.is_empty() {
                    keys.remove(username);
                }
            }
        })
    }

    pub fn keys_for(&self, username: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut keys: KeysByUser = self.store.read_json(SERVER_KEYS)?.unwrap_or_default();
        Ok(keys.remove(username).unwrap_or_default())
    }

    /// Forget every key, for every username. Used when the device identity is reset.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(SERVER_KEYS)
    }

    pub fn invite_code(&self, server: &str) -> Result<Option<String>, StoreError> {
        let codes: BTreeMap<String, String> =
            self.store.read_json(INVITE_CODES)?.unwrap_or_default();
        Ok(codes.get(server).cloned())
    }

    /// Store the invite code for a private server. `None` or a blank code clears it.
    pub fn set_invite_code(&self, server: &str, code: Option<&str>) -> Result<(), StoreError> {
        let code = code.map(str::trim).filter(|code| !code.is_empty());
        self.store
            .update_json(INVITE_CODES, |codes: &mut BTreeMap<String, String>| match code {
                Some(code) => {
                    codes.insert(server.to_string(), code.to_string());
                }
                None => {
                    codes.remove(server);
                }
            })
    }
}
