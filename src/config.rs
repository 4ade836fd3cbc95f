//! Configuration surface for the outbox engine: typed defaults, overridable from the
//! environment via `envy`, with an optional `.env` bootstrap for local development.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{OutboxError, OutboxResult};

/// All tunables exposed by the engine. `envy` maps `OUTBOX_BATCH_SIZE` etc. onto
/// `batch_size`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub batch_size: u32,
    pub max_attempts: u32,
    #[serde(with = "humantime_millis")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_millis")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub backoff_jitter: bool,
    #[serde(with = "humantime_secs")]
    pub fixed_delay: Duration,
    #[serde(with = "humantime_secs")]
    pub shutdown_timeout: Duration,
    pub health_warning_threshold: i64,
    pub health_error_threshold: i64,
    pub service_name: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            backoff_jitter: false,
            fixed_delay: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
            health_warning_threshold: 100,
            health_error_threshold: 500,
            service_name: "outbox".to_string(),
        }
    }
}

impl OutboxConfig {
    /// Load defaults overridden by `OUTBOX_*` environment variables, bootstrapping a local
    /// `.env` file first if one is present (a no-op in production where none exists).
    pub fn load() -> OutboxResult<Self> {
        let _ = dotenv::dotenv();
        let config: Self = envy::prefixed("OUTBOX_")
            .from_env()
            .map_err(|e| OutboxError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OutboxResult<()> {
        if self.backoff_multiplier <= 1.0 {
            return Err(OutboxError::InvalidConfig(
                "backoff_multiplier must be greater than 1.0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(OutboxError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(OutboxError::InvalidConfig(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.health_error_threshold < self.health_warning_threshold {
            return Err(OutboxError::InvalidConfig(
                "health_error_threshold must be >= health_warning_threshold".to_string(),
            ));
        }
        Ok(())
    }
}

mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
