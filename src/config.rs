//! Processor configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! yields a working configuration. Durations are human-readable strings such
//! as `"30s"`, `"4h"` or `"100 years"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::check::StateMachineConfig;
use crate::counters::DEFAULT_INSTANCE_TTL;
use crate::filters::DelayConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path as given.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("Invalid config: {reason}")]
    Validation {
        /// What is wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

/// Settings for one processor instance.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Inbound event queue.
    pub queue: String,
    /// Outbound notification queue.
    pub notifier_queue: String,
    /// Copy every popped event into an hourly archive list.
    pub archive_events: bool,
    /// Retention of each hourly archive list.
    #[serde(with = "humantime_serde")]
    pub events_archive_maxage: Duration,
    /// Length of the scheduled maintenance given to brand-new checks.
    /// A value starting with `-`, or `none`, disables it.
    pub new_check_scheduled_maintenance_duration: String,
    /// Return once the inbound queue is empty instead of waiting.
    pub exit_on_queue_empty: bool,
    /// How long to block on the activity queue before polling again.
    #[serde(with = "humantime_serde")]
    pub queue_wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub initial_failure_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub repeat_failure_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub default_acknowledgement_duration: Duration,
    /// Lifetime of the per-instance counter keys.
    #[serde(with = "humantime_serde")]
    pub counter_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue: "events".to_string(),
            notifier_queue: "notifications".to_string(),
            archive_events: false,
            events_archive_maxage: Duration::from_secs(3 * 60 * 60),
            new_check_scheduled_maintenance_duration: "100 years".to_string(),
            exit_on_queue_empty: false,
            queue_wait_timeout: Duration::from_secs(1),
            initial_failure_delay: Duration::from_secs(30),
            repeat_failure_delay: Duration::from_secs(60),
            default_acknowledgement_duration: Duration::from_secs(4 * 60 * 60),
            counter_ttl: DEFAULT_INSTANCE_TTL,
        }
    }
}

impl ProcessorConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject unusable settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigError::invalid("queue cannot be empty"));
        }
        if self.notifier_queue.trim().is_empty() {
            return Err(ConfigError::invalid("notifier_queue cannot be empty"));
        }
        if self.queue == self.notifier_queue {
            return Err(ConfigError::invalid(format!(
                "queue and notifier_queue are both '{}'",
                self.queue
            )));
        }
        if self.queue_wait_timeout.is_zero() {
            return Err(ConfigError::invalid("queue_wait_timeout must be positive"));
        }
        self.new_check_maintenance()?;
        Ok(())
    }

    /// The new-check maintenance length, or `None` when disabled.
    pub fn new_check_maintenance(&self) -> Result<Option<Duration>, ConfigError> {
        let raw = self.new_check_scheduled_maintenance_duration.trim();
        if raw.starts_with('-') || raw.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        if raw == "0" {
            return Ok(Some(Duration::ZERO));
        }
        humantime::parse_duration(raw).map(Some).map_err(|e| {
            ConfigError::invalid(format!(
                "new_check_scheduled_maintenance_duration '{raw}': {e}"
            ))
        })
    }

    /// Name of the companion list used to wake a blocked processor.
    #[must_use]
    pub fn actions_queue(&self) -> String {
        format!("{}_actions", self.queue)
    }

    /// Settings for [`StateMachine`](crate::check::StateMachine).
    ///
    /// # Errors
    ///
    /// Fails like [`ProcessorConfig::new_check_maintenance`].
    pub fn state_machine_config(&self) -> Result<StateMachineConfig, ConfigError> {
        Ok(StateMachineConfig {
            new_check_maintenance: self.new_check_maintenance()?,
            default_acknowledgement_duration: self.default_acknowledgement_duration,
        })
    }

    /// Default delays for the delays filter.
    #[must_use]
    pub const fn delay_config(&self) -> DelayConfig {
        DelayConfig {
            initial_failure_delay: self.initial_failure_delay,
            repeat_failure_delay: self.repeat_failure_delay,
        }
    }
}
