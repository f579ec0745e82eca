//! Provisioning settings and console defaults.
//!
//! The defaults match the timing of a Cisco IOS console at 9600 baud: prompts
//! can take several seconds to reappear after a mode change, and the device
//! drops characters when configuration lines arrive back to back.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Serial line speed used by factory-default consoles.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Console device path used when none is given, relative to the home directory.
pub const DEFAULT_DEVICE_FILE: &str = "ttyCisco";

/// Unclassified prompts tolerated before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 15;

/// Wait for a prompt before probing, and sleep after probing.
pub const DEFAULT_WAIT_INTERVAL_MS: u64 = 4_000;

/// Wait for the follow-up prompt after a response was written.
pub const DEFAULT_SECONDARY_WAIT_MS: u64 = 3_000;

/// Sleep after a device-altering write before listening again.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 4_000;

/// Sleep after answering the enable password prompt.
pub const DEFAULT_CREDENTIAL_SETTLE_MS: u64 = 2_000;

/// Sleep after `write memory`.
pub const DEFAULT_SAVE_SETTLE_MS: u64 = 1_000;

/// Delay between configuration lines.
pub const DEFAULT_INTER_LINE_DELAY_MS: u64 = 200;

/// Read timeout after which a partial line (an unterminated prompt) is flushed.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1_000;

/// Capacity of the prompt event queue between reader and state machine.
pub const PROMPT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the raw line broadcast feed.
pub const RAW_FEED_CAPACITY: usize = 1024;

/// Settings for one provisioning run.
///
/// All durations are stored in milliseconds so the struct can be loaded from
/// JSON; use the accessor methods to get [`Duration`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Unclassified prompts tolerated before `MaxRetriesExceeded`.
    pub max_retries: usize,
    /// Consecutive silent probes tolerated before `ClassificationTimeout`.
    /// Defaults to `max_retries` when unset.
    pub max_silent_probes: Option<usize>,
    pub wait_interval_ms: u64,
    pub secondary_wait_ms: u64,
    pub settle_delay_ms: u64,
    pub credential_settle_ms: u64,
    pub save_settle_ms: u64,
    pub inter_line_delay_ms: u64,
    pub read_timeout_ms: u64,
    /// Send `write memory` after the push without asking the operator.
    pub save_after_push: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_silent_probes: None,
            wait_interval_ms: DEFAULT_WAIT_INTERVAL_MS,
            secondary_wait_ms: DEFAULT_SECONDARY_WAIT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            credential_settle_ms: DEFAULT_CREDENTIAL_SETTLE_MS,
            save_settle_ms: DEFAULT_SAVE_SETTLE_MS,
            inter_line_delay_ms: DEFAULT_INTER_LINE_DELAY_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            save_after_push: false,
        }
    }
}

impl ProvisionConfig {
    /// Parses settings from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConsoleError> {
        let config: ProvisionConfig = serde_json::from_str(json)
            .map_err(|e| ConsoleError::InvalidConfig(format!("decode settings: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConsoleError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| {
            ConsoleError::ConfigFileError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json(&json)
    }

    /// JSON schema of the settings file.
    pub fn json_schema() -> Result<String, ConsoleError> {
        let schema = schemars::schema_for!(ProvisionConfig);
        serde_json::to_string_pretty(&schema)
            .map_err(|e| ConsoleError::InternalError(format!("encode settings schema: {e}")))
    }

    /// Rejects settings that would make the state machine spin or never wait.
    pub fn validate(&self) -> Result<(), ConsoleError> {
        if self.max_retries == 0 {
            return Err(ConsoleError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.max_silent_probes == Some(0) {
            return Err(ConsoleError::InvalidConfig(
                "max_silent_probes must be at least 1".to_string(),
            ));
        }
        if self.wait_interval_ms == 0 {
            return Err(ConsoleError::InvalidConfig(
                "wait_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConsoleError::InvalidConfig(
                "read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_inter_line_delay(mut self, delay: Duration) -> Self {
        self.inter_line_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_save_after_push(mut self, save: bool) -> Self {
        self.save_after_push = save;
        self
    }

    /// Effective silence budget.
    pub fn silent_probe_limit(&self) -> usize {
        self.max_silent_probes.unwrap_or(self.max_retries)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    pub fn secondary_wait(&self) -> Duration {
        Duration::from_millis(self.secondary_wait_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn credential_settle(&self) -> Duration {
        Duration::from_millis(self.credential_settle_ms)
    }

    pub fn save_settle(&self) -> Duration {
        Duration::from_millis(self.save_settle_ms)
    }

    pub fn inter_line_delay(&self) -> Duration {
        Duration::from_millis(self.inter_line_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
