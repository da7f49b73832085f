//! The backend calls the agent makes, one server at a time.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::Platform;
use crate::health::StepDataSource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid invite code")]
    InvalidInvite,
    #[error("Server not found")]
    ServerNotFound,
    #[error("No previous registration")]
    NotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub server: String,
    pub credential: String,
    pub username: String,
    pub device_id: String,
    /// Full trusted total for `day`. The backend replaces the day's value, so never a delta.
    pub steps: i64,
    pub day: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub source: StepDataSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestAck {
    pub day: Option<String>,
    pub steps_today: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTokenRequest {
    pub server: String,
    pub credential: String,
    pub device_id: String,
    pub platform: Platform,
    /// Required to register. When unregistering, `None` drops every token of this device.
    pub token: Option<String>,
    pub sandbox: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    pub server_name: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewardTier {
    pub min_steps: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub rewards: Vec<String>,
}

/// The backend, as seen by one device.
#[async_trait]
pub trait RegistrationApi: Send + Sync {
    /// Fails with [`ApiError::InvalidInvite`] or [`ApiError::ServerNotFound`].
    async fn register(
        &self,
        device_id: &str,
        username: &str,
        server: &str,
        invite_code: Option<&str>,
    ) -> Result<String, ApiError>;

    /// Fails with [`ApiError::NotFound`] when this device never registered the username on
    /// that server; callers then fall back to [`RegistrationApi::register`].
    async fn recover_credential(
        &self,
        device_id: &str,
        username: &str,
        server: &str,
    ) -> Result<String, ApiError>;

    async fn ingest(&self, request: &IngestRequest) -> Result<IngestAck, ApiError>;

    async fn register_push_token(&self, request: &PushTokenRequest) -> Result<(), ApiError>;

    async fn unregister_push_token(&self, request: &PushTokenRequest) -> Result<(), ApiError>;

    async fn available_servers(&self, invite_code: Option<&str>)
    -> Result<Vec<ServerInfo>, ApiError>;

    async fn rewards(
        &self,
        device_id: &str,
        server: &str,
        credential: &str,
    ) -> Result<Vec<RewardTier>, ApiError>;
}
