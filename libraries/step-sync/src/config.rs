use chrono_tz::Tz;

use crate::Platform;

/// Daily username resets happen at midnight in this zone for every player.
pub const DEFAULT_REFERENCE_ZONE: Tz = chrono_tz::America::Chicago;
/// Most recent sync attempts kept in the log.
pub const DEFAULT_LOG_CAPACITY: usize = 25;

/// Engine-wide settings that are not player preferences.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub platform: Platform,
    pub reference_zone: Tz,
    pub log_capacity: usize,
    /// Register push tokens against the sandbox push environment.
    pub push_sandbox: bool,
}

impl EngineConfig {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            reference_zone: DEFAULT_REFERENCE_ZONE,
            log_capacity: DEFAULT_LOG_CAPACITY,
            push_sandbox: cfg!(debug_assertions),
        }
    }

    pub fn with_reference_zone(mut self, zone: Tz) -> Self {
        self.reference_zone = zone;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }
}
