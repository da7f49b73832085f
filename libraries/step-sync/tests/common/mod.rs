#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use step_sync::api::{
    ApiError, IngestAck, IngestRequest, PushTokenRequest, RegistrationApi, RewardTier, ServerInfo,
};
use step_sync::clock::FixedClock;
use step_sync::device::DeviceIdentity;
use step_sync::health::{
    Authorization, HealthError, HealthSource, RecordingMethod, StepDataSource, StepRecord,
};
use step_sync::milestones::Notifier;
use step_sync::push::PushTokenReconciler;
use step_sync::store::{MemoryStore, SharedStore};
use step_sync::{EngineConfig, Platform, SyncOrchestrator};

pub const DEVICE_ID: &str = "dev-test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Register { username: String, server: String },
    Recover { username: String, server: String },
    Ingest { server: String, credential: String, steps: i64 },
    RegisterPush { server: String, token: String },
    UnregisterPush { server: String, token: Option<String> },
    Rewards { server: String },
}

#[derive(Default)]
struct FakeState {
    /// (username, server) -> key the backend would hand back on recover.
    registrations: HashMap<(String, String), String>,
    register_keys: HashMap<String, String>,
    register_errors: HashMap<String, ApiError>,
    ingest_errors: HashMap<String, ApiError>,
    ingest_delays: HashMap<String, Duration>,
    revoked: HashSet<String>,
    rewards: HashMap<String, Vec<RewardTier>>,
    issued: usize,
    calls: Vec<Call>,
}

/// In-memory backend that records every call.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// `register` on `server` returns `key`.
    pub fn issue_key(&self, server: &str, key: &str) {
        self.state()
            .register_keys
            .insert(server.to_string(), key.to_string());
    }

    /// `recover_credential` for the pair returns `key`.
    pub fn existing_registration(&self, username: &str, server: &str, key: &str) {
        self.state()
            .registrations
            .insert((username.to_string(), server.to_string()), key.to_string());
    }

    pub fn fail_register(&self, server: &str, error: ApiError) {
        self.state()
            .register_errors
            .insert(server.to_string(), error);
    }

    pub fn fail_ingest(&self, server: &str, error: ApiError) {
        self.state().ingest_errors.insert(server.to_string(), error);
    }

    pub fn slow_ingest(&self, server: &str, delay: Duration) {
        self.state()
            .ingest_delays
            .insert(server.to_string(), delay);
    }

    /// Ingest with this key answers 401.
    pub fn revoke(&self, key: &str) {
        self.state().revoked.insert(key.to_string());
    }

    pub fn set_rewards(&self, server: &str, tiers: Vec<RewardTier>) {
        self.state().rewards.insert(server.to_string(), tiers);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn ingests(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Ingest { .. }))
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }
}

#[async_trait]
impl RegistrationApi for FakeApi {
    async fn register(
        &self,
        _device_id: &str,
        username: &str,
        server: &str,
        _invite_code: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Register {
            username: username.to_string(),
            server: server.to_string(),
        });
        if let Some(error) = state.register_errors.get(server) {
            return Err(error.clone());
        }
        state.issued += 1;
        let key = match state.register_keys.get(server) {
            Some(key) => key.clone(),
            None => format!("key-{server}-{}", state.issued),
        };
        state
            .registrations
            .insert((username.to_string(), server.to_string()), key.clone());
        Ok(key)
    }

    async fn recover_credential(
        &self,
        _device_id: &str,
        username: &str,
        server: &str,
    ) -> Result<String, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Recover {
            username: username.to_string(),
            server: server.to_string(),
        });
        match state
            .registrations
            .get(&(username.to_string(), server.to_string()))
        {
            Some(key) if !state.revoked.contains(key) => Ok(key.clone()),
            _ => Err(ApiError::NotFound),
        }
    }

    async fn ingest(&self, request: &IngestRequest) -> Result<IngestAck, ApiError> {
        let delay = {
            let mut state = self.state();
            state.calls.push(Call::Ingest {
                server: request.server.clone(),
                credential: request.credential.clone(),
                steps: request.steps,
            });
            state.ingest_delays.get(&request.server).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        if state.revoked.contains(&request.credential) {
            return Err(ApiError::Unauthorized);
        }
        if let Some(error) = state.ingest_errors.get(&request.server) {
            return Err(error.clone());
        }
        Ok(IngestAck {
            day: Some(request.day.to_string()),
            steps_today: Some(request.steps),
        })
    }

    async fn register_push_token(&self, request: &PushTokenRequest) -> Result<(), ApiError> {
        self.state().calls.push(Call::RegisterPush {
            server: request.server.clone(),
            token: request.token.clone().unwrap_or_default(),
        });
        Ok(())
    }

    async fn unregister_push_token(&self, request: &PushTokenRequest) -> Result<(), ApiError> {
        self.state().calls.push(Call::UnregisterPush {
            server: request.server.clone(),
            token: request.token.clone(),
        });
        Ok(())
    }

    async fn available_servers(
        &self,
        _invite_code: Option<&str>,
    ) -> Result<Vec<ServerInfo>, ApiError> {
        Ok(Vec::new())
    }

    async fn rewards(
        &self,
        _device_id: &str,
        server: &str,
        _credential: &str,
    ) -> Result<Vec<RewardTier>, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Rewards {
            server: server.to_string(),
        });
        Ok(state.rewards.get(server).cloned().unwrap_or_default())
    }
}

pub struct FakeHealth {
    pub authorization: Mutex<Authorization>,
    pub records: Mutex<Vec<StepRecord>>,
}

impl FakeHealth {
    pub fn new(records: Vec<StepRecord>) -> Arc<Self> {
        Arc::new(Self {
            authorization: Mutex::new(Authorization::Authorized),
            records: Mutex::new(records),
        })
    }
}

#[async_trait]
impl HealthSource for FakeHealth {
    fn kind(&self) -> StepDataSource {
        StepDataSource::HealthConnect
    }

    async fn authorization(&self) -> Authorization {
        *self.authorization.lock().unwrap()
    }

    async fn read_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StepRecord>, HealthError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.start < end && r.end > start)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub enabled: bool,
    pub shown: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn notifications_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, server: &str, message: &str) {
        self.shown
            .lock()
            .unwrap()
            .push((server.to_string(), message.to_string()));
    }
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 15, 0, 0).unwrap()
}

/// A pedometer record from this morning.
pub fn walked(count: i64) -> StepRecord {
    StepRecord {
        count,
        start: Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap(),
        recording_method: RecordingMethod::AutomaticallyRecorded,
        source_app: "com.google.android.apps.fitness".to_string(),
    }
}

pub struct Harness {
    pub store: SharedStore,
    pub api: Arc<FakeApi>,
    pub health: Arc<FakeHealth>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub fn new(records: Vec<StepRecord>) -> Self {
        Self::with_config(records, EngineConfig::new(Platform::Android))
    }

    pub fn with_config(records: Vec<StepRecord>, config: EngineConfig) -> Self {
        let store = SharedStore::new(MemoryStore::new());
        let api = FakeApi::new();
        let health = FakeHealth::new(records);
        let clock = Arc::new(FixedClock::new(now()));
        let orchestrator = SyncOrchestrator::new(
            config,
            store.clone(),
            DeviceIdentity {
                device_id: DEVICE_ID.to_string(),
            },
            api.clone(),
            health.clone(),
            clock.clone(),
        );
        Self {
            store,
            api,
            health,
            clock,
            orchestrator,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.orchestrator = self.orchestrator.with_notifier(notifier);
        self
    }

    pub fn reconciler(&self) -> PushTokenReconciler {
        PushTokenReconciler::new(
            self.api.clone(),
            self.store.clone(),
            DeviceIdentity {
                device_id: DEVICE_ID.to_string(),
            },
            Platform::Android,
            false,
        )
    }

    pub fn with_push(mut self) -> Self {
        let reconciler = self.reconciler();
        self.orchestrator = self.orchestrator.with_push(reconciler);
        self
    }

    /// Set the username and select `servers`, in order.
    pub fn configure(&self, username: &str, servers: &[&str]) {
        self.orchestrator
            .profiles()
            .update_profile(|p| p.minecraft_username = username.to_string())
            .unwrap();
        for server in servers {
            self.orchestrator.profiles().select_server(server).unwrap();
        }
    }
}
