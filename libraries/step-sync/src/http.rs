//! [`RegistrationApi`] over the StepCraft REST backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::api::{
    ApiError, IngestAck, IngestRequest, PushTokenRequest, RegistrationApi, RewardTier, ServerInfo,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which endpoint a response came from; decides what a 403 or 404 means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Register,
    Recover,
    Ingest,
    Push,
    Discovery,
    Rewards,
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
    device_id: &'a str,
    minecraft_username: &'a str,
    server_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invite_code: Option<&'a str>,
}

#[derive(Deserialize)]
struct PlayerApiKeyResponse {
    player_api_key: String,
}

#[derive(Serialize)]
struct IngestPayload<'a> {
    minecraft_username: &'a str,
    device_id: &'a str,
    steps_today: i64,
    player_api_key: &'a str,
    day: String,
    source: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
struct IngestResponse {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    day: Option<String>,
    #[serde(default)]
    steps_today: Option<i64>,
}

#[derive(Serialize)]
struct PushPayload<'a> {
    device_id: &'a str,
    player_api_key: &'a str,
    platform: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    apns_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sandbox: Option<bool>,
}

#[derive(Deserialize)]
struct AvailableServersResponse {
    servers: Vec<ServerInfo>,
}

#[derive(Deserialize)]
struct RewardsResponse {
    tiers: Vec<RewardTier>,
}

pub struct HttpRegistrationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRegistrationClient {
    /// `api_key` is the global app key, sent as `X-API-Key` on every call. Player-scoped calls
    /// also carry the player's key in the body.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, api_key, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        call: Call,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;
        Self::decode(call, response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        call: Call,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header("X-API-Key", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;
        Self::decode(call, response).await
    }

    async fn decode<T: DeserializeOwned>(
        call: Call,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            let error = classify(call, status.as_u16(), &body);
            log::debug!("{call:?} failed with {status}: {body}");
            return Err(error);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{e}: {body}")))
    }
}

/// Map a non-2xx response to the error the engine reacts to.
fn classify(call: Call, status: u16, body: &str) -> ApiError {
    match (status, call) {
        (401, _) => ApiError::Unauthorized,
        (403, Call::Register) => ApiError::InvalidInvite,
        (404, Call::Register | Call::Ingest) => ApiError::ServerNotFound,
        (404, Call::Recover) => ApiError::NotFound,
        _ => ApiError::Http {
            status,
            message: error_message(body),
        },
    }
}

/// The backend reports errors as `{"detail": ...}`, `{"message": ...}` or `{"error": ...}`.
fn error_message(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error", "detail"] {
            match map.get(field) {
                Some(serde_json::Value::String(message)) => return message.clone(),
                Some(serde_json::Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl RegistrationApi for HttpRegistrationClient {
    async fn register(
        &self,
        device_id: &str,
        username: &str,
        server: &str,
        invite_code: Option<&str>,
    ) -> Result<String, ApiError> {
        let payload = RegisterPayload {
            device_id,
            minecraft_username: username,
            server_name: server,
            invite_code,
        };
        let response: PlayerApiKeyResponse = self
            .post(Call::Register, "/v1/players/register", &payload)
            .await?;
        Ok(response.player_api_key)
    }

    async fn recover_credential(
        &self,
        device_id: &str,
        username: &str,
        server: &str,
    ) -> Result<String, ApiError> {
        let payload = RegisterPayload {
            device_id,
            minecraft_username: username,
            server_name: server,
            invite_code: None,
        };
        let response: PlayerApiKeyResponse = self
            .post(Call::Recover, "/v1/players/recover-key", &payload)
            .await?;
        Ok(response.player_api_key)
    }

    async fn ingest(&self, request: &IngestRequest) -> Result<IngestAck, ApiError> {
        let payload = IngestPayload {
            minecraft_username: &request.username,
            device_id: &request.device_id,
            steps_today: request.steps,
            player_api_key: &request.credential,
            day: request.day.format("%Y-%m-%d").to_string(),
            source: request.source.as_str(),
            timestamp: request.timestamp.to_rfc3339(),
        };
        let response: IngestResponse = self.post(Call::Ingest, "/v1/ingest", &payload).await?;
        if !response.ok {
            return Err(ApiError::Rejected(
                response
                    .reason
                    .unwrap_or_else(|| "ingest rejected".to_string()),
            ));
        }
        Ok(IngestAck {
            day: response.day,
            steps_today: response.steps_today,
        })
    }

    async fn register_push_token(&self, request: &PushTokenRequest) -> Result<(), ApiError> {
        let Some(token) = request.token.as_deref() else {
            return Err(ApiError::Decode("push registration needs a token".to_string()));
        };
        let payload = PushPayload {
            device_id: &request.device_id,
            player_api_key: &request.credential,
            platform: request.platform.as_str(),
            apns_token: Some(token),
            sandbox: Some(request.sandbox),
        };
        let _: serde_json::Value = self
            .post(Call::Push, "/v1/players/push/register-device", &payload)
            .await?;
        Ok(())
    }

    async fn unregister_push_token(&self, request: &PushTokenRequest) -> Result<(), ApiError> {
        let payload = PushPayload {
            device_id: &request.device_id,
            player_api_key: &request.credential,
            platform: request.platform.as_str(),
            apns_token: request.token.as_deref(),
            sandbox: None,
        };
        let _: serde_json::Value = self
            .post(Call::Push, "/v1/players/push/unregister-device", &payload)
            .await?;
        Ok(())
    }

    async fn available_servers(
        &self,
        invite_code: Option<&str>,
    ) -> Result<Vec<ServerInfo>, ApiError> {
        let query: Vec<(&str, &str)> = invite_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| vec![("invite_code", code)])
            .unwrap_or_default();
        let response: AvailableServersResponse = self
            .get(Call::Discovery, "/v1/servers/available", &query)
            .await?;
        Ok(response.servers)
    }

    async fn rewards(
        &self,
        device_id: &str,
        server: &str,
        credential: &str,
    ) -> Result<Vec<RewardTier>, ApiError> {
        let response: RewardsResponse = self
            .get(
                Call::Rewards,
                "/v1/players/rewards",
                &[
                    ("device_id", device_id),
                    ("server_name", server),
                    ("player_api_key", credential),
                ],
            )
            .await?;
        Ok(response.tiers)
    }
}
