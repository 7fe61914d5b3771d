use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::recovery::RetryConfig;
use crate::error::{SoftphoneError, SoftphoneResult};

/// Longest accepted delay before a suggested callback (one year)
pub const MAX_CALLBACK_DELAY_SECS: u64 = 366 * 24 * 60 * 60;

/// Configuration for the session client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftphoneConfig {
    /// How long an inbound call may ring before it is marked missed
    pub ring_timeout_ms: u64,
    /// How long an answered call may wait for the provider's `connected` event
    pub connect_timeout_ms: u64,
    /// Upper bound for any single provider round trip
    pub provider_timeout_secs: u64,
    /// Backoff policy for `initialize`
    pub registration_retry: RetryConfig,
    /// Buffer size of the broadcast event channel
    pub event_channel_capacity: usize,
    /// Buffer size of the command channel into the session actor
    pub command_channel_capacity: usize,
    /// Allow outbound calls while the agent is `busy`
    pub allow_dial_when_busy: bool,
    /// Create a callback suggestion whenever an inbound call is missed
    pub auto_suggest_callbacks: bool,
    /// Delay between the missed call and the suggested callback time
    pub callback_delay_secs: u64,
    /// Keep only the newest N call log entries; `None` keeps everything
    pub max_call_log_entries: Option<usize>,
}

impl Default for SoftphoneConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftphoneConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            ring_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            provider_timeout_secs: 10,
            registration_retry: RetryConfig::default(),
            event_channel_capacity: 256,
            command_channel_capacity: 64,
            allow_dial_when_busy: true,
            auto_suggest_callbacks: true,
            callback_delay_secs: 900,
            max_call_log_entries: None,
        }
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_provider_timeout_secs(mut self, secs: u64) -> Self {
        self.provider_timeout_secs = secs;
        self
    }

    pub fn with_registration_retry(mut self, retry: RetryConfig) -> Self {
        self.registration_retry = retry;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    pub fn with_dial_when_busy(mut self, allow: bool) -> Self {
        self.allow_dial_when_busy = allow;
        self
    }

    pub fn with_auto_suggest_callbacks(mut self, enabled: bool) -> Self {
        self.auto_suggest_callbacks = enabled;
        self
    }

    pub fn with_callback_delay_secs(mut self, secs: u64) -> Self {
        self.callback_delay_secs = secs;
        self
    }

    pub fn with_max_call_log_entries(mut self, max: usize) -> Self {
        self.max_call_log_entries = Some(max);
        self
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// `None` when the delay does not fit a `chrono::Duration`
    pub fn callback_delay(&self) -> Option<chrono::Duration> {
        let secs = i64::try_from(self.callback_delay_secs).ok()?;
        chrono::Duration::try_seconds(secs)
    }

    /// Reject values the session actor cannot work with
    pub fn validate(&self) -> SoftphoneResult<()> {
        if self.ring_timeout_ms == 0 {
            return Err(invalid("ring_timeout_ms", "must be greater than zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", "must be greater than zero"));
        }
        if self.callback_delay_secs > MAX_CALLBACK_DELAY_SECS {
            return Err(invalid("callback_delay_secs", "must be at most one year"));
        }
        if self.provider_timeout_secs == 0 {
            return Err(invalid("provider_timeout_secs", "must be greater than zero"));
        }
        if self.registration_retry.max_attempts == 0 {
            return Err(invalid("registration_retry.max_attempts", "must be at least 1"));
        }
        if self.registration_retry.backoff_multiplier < 1.0 {
            return Err(invalid("registration_retry.backoff_multiplier", "must be at least 1.0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(invalid("event_channel_capacity", "must be greater than zero"));
        }
        if self.command_channel_capacity == 0 {
            return Err(invalid("command_channel_capacity", "must be greater than zero"));
        }
        if self.max_call_log_entries == Some(0) {
            return Err(invalid("max_call_log_entries", "must be greater than zero when set"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> SoftphoneError {
    SoftphoneError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
