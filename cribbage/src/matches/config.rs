//! Match manager configuration.

use std::{env, time::Duration};

/// Default bounded wait for a match lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-subscriber broadcast buffer.
pub const DEFAULT_BROADCAST_BUFFER: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// How long a request waits for a match lock before giving up as busy.
    pub lock_timeout: Duration,

    /// Messages buffered per subscriber before it is considered too slow
    /// and dropped.
    pub broadcast_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
        }
    }
}

impl ManagerConfig {
    /// Reads `MATCH_LOCK_TIMEOUT_MS` and `BROADCAST_BUFFER`, keeping the
    /// defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let lock_timeout = env::var("MATCH_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(defaults.lock_timeout, Duration::from_millis);
        let broadcast_buffer = env::var("BROADCAST_BUFFER")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.broadcast_buffer);
        Self {
            lock_timeout,
            broadcast_buffer,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout.is_zero() {
            return Err("Lock timeout must be greater than zero".to_string());
        }
        if self.broadcast_buffer == 0 {
            return Err("Broadcast buffer must hold at least one message".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.broadcast_buffer, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = ManagerConfig {
            lock_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ManagerConfig {
            broadcast_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
