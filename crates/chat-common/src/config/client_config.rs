//! Client runtime configuration

use serde::Deserialize;
use std::env;
use std::time::Duration;

use super::{var_or, ConfigError};

/// Client configuration: gateway address, reconnection policy, and local timers
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the gateway endpoint
    pub gateway_url: String,
    /// Consecutive failed connection attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,
    /// Local typing debounce window
    #[serde(default = "default_typing_debounce")]
    pub typing_debounce_ms: u64,
    /// How long a remote typing indicator lives without a refresh
    #[serde(default = "default_typing_expiry")]
    pub typing_expiry_ms: u64,
    /// How long an optimistic mutation waits for confirmation
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_ms: u64,
    /// Capacity of the outbound frame queue
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    500
}

fn default_reconnect_max_delay() -> u64 {
    8_000
}

fn default_typing_debounce() -> u64 {
    2_000
}

fn default_typing_expiry() -> u64 {
    3_000
}

fn default_confirmation_timeout() -> u64 {
    10_000
}

fn default_outbound_queue() -> usize {
    256
}

impl ClientConfig {
    /// Configuration with default timers for the given gateway URL
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            typing_debounce_ms: default_typing_debounce(),
            typing_expiry_ms: default_typing_expiry(),
            confirmation_timeout_ms: default_confirmation_timeout(),
            outbound_queue: default_outbound_queue(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHAT_GATEWAY_URL` is missing or a value is malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            gateway_url: env::var("CHAT_GATEWAY_URL")
                .map_err(|_| ConfigError::MissingVar("CHAT_GATEWAY_URL"))?,
            max_reconnect_attempts: var_or(
                "CHAT_MAX_RECONNECT_ATTEMPTS",
                default_max_reconnect_attempts(),
            )?,
            reconnect_base_delay_ms: var_or(
                "CHAT_RECONNECT_BASE_DELAY_MS",
                default_reconnect_base_delay(),
            )?,
            reconnect_max_delay_ms: var_or(
                "CHAT_RECONNECT_MAX_DELAY_MS",
                default_reconnect_max_delay(),
            )?,
            typing_debounce_ms: var_or("CHAT_TYPING_DEBOUNCE_MS", default_typing_debounce())?,
            typing_expiry_ms: var_or("CHAT_TYPING_EXPIRY_MS", default_typing_expiry())?,
            confirmation_timeout_ms: var_or(
                "CHAT_CONFIRMATION_TIMEOUT_MS",
                default_confirmation_timeout(),
            )?,
            outbound_queue: var_or("CHAT_OUTBOUND_QUEUE_SIZE", default_outbound_queue())?,
        })
    }

    /// Backoff before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(delay)
    }

    #[must_use]
    pub fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms)
    }

    #[must_use]
    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }

    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}
