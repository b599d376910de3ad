//! Reconnect timing configuration.

use crate::error::SessionError;
use std::time::Duration;
use tracing::warn;

/// Default wait before reconnecting after any disconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Default maximum silence on an open stream.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(13000);

/// Longest interval the server leaves between keep-alive records.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(12);

/// Reconnect/idle configuration.
///
/// The delay is fixed: every attempt waits `reconnect_delay`, and attempts
/// continue until the session is aborted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub reconnect_delay: Duration,
    /// A stream silent for this long is treated as dead and its socket dropped.
    pub idle_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Check the configuration before a session uses it.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.reconnect_delay.is_zero() {
            return Err(SessionError::Config(
                "reconnect delay must be > 0".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(SessionError::Config("idle timeout must be > 0".to_string()));
        }
        if self.idle_timeout <= KEEP_ALIVE_INTERVAL {
            warn!(
                idle_timeout_ms = self.idle_timeout.as_millis() as u64,
                "idle timeout does not exceed the keep-alive interval; quiet streams will be dropped"
            );
        }
        Ok(())
    }
}
