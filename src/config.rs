//! Engine configuration

use std::env;
use std::time::Duration;

use crate::{ConversationError, Result};

/// Tuning knobs for [`crate::ConversationEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Compare-and-set attempts before an operation surfaces `Conflict`
    pub max_cas_attempts: u32,
    /// Upper bound for a single store round (read + conditional write)
    pub store_timeout: Duration,
    /// How long an operation waits for the per-ticket critical section
    pub lock_timeout: Duration,
    /// Upper bound for one notification delivery
    pub notification_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 3,
            store_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(10),
            notification_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            max_cas_attempts: env::var("SUPPORT_MAX_CAS_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_cas_attempts),
            store_timeout: millis_from_env("SUPPORT_STORE_TIMEOUT_MS")
                .unwrap_or(defaults.store_timeout),
            lock_timeout: millis_from_env("SUPPORT_LOCK_TIMEOUT_MS")
                .unwrap_or(defaults.lock_timeout),
            notification_timeout: millis_from_env("SUPPORT_NOTIFICATION_TIMEOUT_MS")
                .unwrap_or(defaults.notification_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cas_attempts == 0 {
            return Err(ConversationError::Validation(
                "max_cas_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn millis_from_env(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
