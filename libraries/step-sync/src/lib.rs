//! Platform-neutral step synchronization for StepCraft clients.
//!
//! A phone reads the player's steps from the platform health store and reports them to every
//! Minecraft server the player has joined, so rewards can be claimed in game.
//!
//! Syncing strategy:
//! 1. Each install gets a stable device ID, persisted in the injected [`store::Store`].
//! 2. The player picks one Minecraft username and any number of servers. Every
//!    `(username, server)` pair owns its own API key, issued by the backend.
//! 3. A sync attempt reads today's trusted step total exactly once, then walks the selected
//!    servers in order: find the key (local cache, then `recover-key`, then `register`) and send
//!    the full day total to `ingest`. One server failing never stops the others.
//! 4. Every attempt that gets past configuration checks leaves exactly one entry in the sync log.
//!    There are no retry loops: the next scheduled or manual sync is the retry.
//!
//! Usernames may change at most once per reference day. A second change on the same day is
//! queued and applied automatically after the next daily reset.

pub mod api;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod device;
pub mod health;
pub mod identity;
pub mod milestones;
pub mod orchestrator;
pub mod profile;
pub mod push;
pub mod store;
pub mod sync_log;

#[cfg(feature = "http")]
pub mod http;

pub use config::EngineConfig;
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use sync_log::{SyncLogEntry, SyncTrigger};

/// The mobile platform the agent runs on. Sent to the backend with push registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform `{other}`")),
        }
    }
}

/// Errors surfaced to the host by engine-level operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Not configured: {0}")]
    NotConfigured(String),
    #[error("Invalid username: {0}")]
    InvalidUsername(String),
    #[error(transparent)]
    Api(#[from] api::ApiError),
    #[error(transparent)]
    Health(#[from] health::HealthError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
}
