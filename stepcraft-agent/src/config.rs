use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use step_sync::config::{DEFAULT_LOG_CAPACITY, DEFAULT_REFERENCE_ZONE};
use step_sync::{EngineConfig, Platform};

/// Agent settings, read from `STEPCRAFT_*` environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_url: String,
    pub api_key: String,
    pub reference_zone: Tz,
    pub log_capacity: usize,
    pub request_timeout: Duration,
    pub platform: Platform,
    pub store_path: PathBuf,
    pub push_sandbox: bool,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let base_url = var("STEPCRAFT_BASE_URL")
            .context("STEPCRAFT_BASE_URL environment variable not set")?;
        let api_key =
            var("STEPCRAFT_API_KEY").context("STEPCRAFT_API_KEY environment variable not set")?;

        let reference_zone = match var("STEPCRAFT_TIMEZONE") {
            Some(zone) => zone
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow!("Invalid STEPCRAFT_TIMEZONE `{zone}`: {e}"))?,
            None => DEFAULT_REFERENCE_ZONE,
        };
        let log_capacity = match var("STEPCRAFT_LOG_CAPACITY") {
            Some(capacity) => capacity
                .trim()
                .parse()
                .with_context(|| format!("Invalid STEPCRAFT_LOG_CAPACITY `{capacity}`"))?,
            None => DEFAULT_LOG_CAPACITY,
        };
        let request_timeout = match var("STEPCRAFT_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(
                secs.trim()
                    .parse()
                    .with_context(|| format!("Invalid STEPCRAFT_TIMEOUT_SECS `{secs}`"))?,
            ),
            None => Duration::from_secs(30),
        };
        let platform = match var("STEPCRAFT_PLATFORM") {
            Some(platform) => platform.parse::<Platform>().map_err(|e| anyhow!(e))?,
            None => Platform::Android,
        };
        let store_path = var("STEPCRAFT_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("stepcraft-state.json"));
        let push_sandbox = var("STEPCRAFT_PUSH_SANDBOX")
            .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            base_url,
            api_key,
            reference_zone,
            log_capacity,
            request_timeout,
            platform,
            store_path,
            push_sandbox,
        })
    }

    pub fn engine(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(self.platform)
            .with_reference_zone(self.reference_zone)
            .with_log_capacity(self.log_capacity);
        engine.push_sandbox = self.push_sandbox;
        engine
    }
}
