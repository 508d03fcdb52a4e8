//! Retention configuration.
//!
//! Controls which tables are pruned, how old an entry must be before it is
//! deleted, and how a run is scheduled and parallelised.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! default_max_age_days = 30
//! delete_enabled = true
//! interval_hours = 24
//! max_concurrent_units = 4
//!
//! [[retention.policies]]
//! entity_kind = "log"
//! age_attribute = "dttm"
//! identity_columns = ["id"]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::{
    models::RetentionPolicy,
    retention::{MAX_AGE_DAYS_LIMIT, PolicyRegistry, RegistryError, RunConfig, RunOptions},
};

/// Longest allowed scheduling interval (one year).
pub const MAX_INTERVAL_HOURS: u64 = 24 * 366;

/// Retention configuration.
///
/// Omitting `policies` selects the built-in metadata-store registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Maximum entry age in days when a run carries no override.
    /// Default: 30
    #[serde(default = "default_max_age_days")]
    pub default_max_age_days: u32,

    /// Delete matched entries. When false, runs only report candidates.
    /// Default: true
    #[serde(default = "default_true")]
    pub delete_enabled: bool,

    /// How often the scheduled worker runs (in hours).
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Run once immediately when the worker starts instead of waiting a full
    /// interval first.
    /// Default: true
    #[serde(default = "default_true")]
    pub run_on_start: bool,

    /// Maximum number of tables cleaned up at the same time.
    /// Default: 4
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Maximum number of in-flight deletes within one table.
    /// Default: 1 (sequential)
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,

    /// Optional run deadline in seconds. Tables whose cleanup has not started
    /// when it passes are reported as not attempted.
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,

    /// Tables to prune, in processing order.
    #[serde(default)]
    pub policies: Option<Vec<RetentionPolicy>>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_max_age_days: default_max_age_days(),
            delete_enabled: true,
            interval_hours: default_interval_hours(),
            run_on_start: true,
            max_concurrent_units: default_max_concurrent_units(),
            delete_concurrency: default_delete_concurrency(),
            run_deadline_secs: None,
            policies: None,
        }
    }
}

fn default_max_age_days() -> u32 {
    crate::retention::DEFAULT_MAX_AGE_DAYS
}

fn default_interval_hours() -> u64 {
    24
}

fn default_max_concurrent_units() -> usize {
    4
}

fn default_delete_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl RetentionConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }

    /// Build the policy registry: the configured policies, or the built-in
    /// metadata-store tables when none are configured.
    pub fn registry(&self) -> Result<PolicyRegistry, RegistryError> {
        match &self.policies {
            Some(policies) => PolicyRegistry::new(policies.clone()),
            None => Ok(PolicyRegistry::metastore_defaults()),
        }
    }

    /// Per-run settings with no override.
    pub fn run_config(&self) -> RunConfig {
        RunConfig::from_retention_config(self)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_concurrent_units: self.max_concurrent_units,
            delete_concurrency: self.delete_concurrency,
            deadline: self.run_deadline(),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_age_days > MAX_AGE_DAYS_LIMIT {
            return Err(ConfigError::Validation(format!(
                "retention.default_max_age_days must be at most {}",
                MAX_AGE_DAYS_LIMIT
            )));
        }
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "retention.interval_hours must be at least 1".into(),
            ));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(ConfigError::Validation(format!(
                "retention.interval_hours must be at most {}",
                MAX_INTERVAL_HOURS
            )));
        }
        if self.max_concurrent_units == 0 {
            return Err(ConfigError::Validation(
                "retention.max_concurrent_units must be at least 1".into(),
            ));
        }
        if self.delete_concurrency == 0 {
            return Err(ConfigError::Validation(
                "retention.delete_concurrency must be at least 1".into(),
            ));
        }
        self.registry()
            .map_err(|e| ConfigError::Validation(format!("retention.policies: {e}")))?;
        Ok(())
    }
}
