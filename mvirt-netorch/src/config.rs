//! Orchestrator configuration.
//!
//! Embedding daemons flatten [`OrchestratorConfig`] into their clap
//! arguments or load it from a JSON file.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Seconds a network must stay idle before the GC shuts it down.
const DEFAULT_GC_WAIT_SECS: u64 = 600;

/// Seconds between GC passes.
const DEFAULT_GC_INTERVAL_SECS: u64 = 600;

const DEFAULT_NETWORK_LOCK_TIMEOUT_SECS: u64 = 600;

const DEFAULT_ACCOUNT_LOCK_TIMEOUT_SECS: u64 = 600;

/// Seconds a GC pass waits for the global GC lock before skipping.
const DEFAULT_GC_LOCK_TIMEOUT_SECS: u64 = 3;

const DEFAULT_GUEST_DOMAIN_SUFFIX: &str = "cloud.internal";

/// Default NIC throttling rate in Mbps.
const DEFAULT_NETWORK_THROTTLING_RATE: u32 = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds an idle network is kept before the GC shuts it down
    #[arg(long = "network-gc-wait", default_value_t = DEFAULT_GC_WAIT_SECS)]
    pub network_gc_wait_secs: u64,

    /// Seconds between network GC passes
    #[arg(
        long = "network-gc-interval",
        default_value_t = DEFAULT_GC_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub network_gc_interval_secs: u64,

    /// Seconds to wait for a network lock
    #[arg(long = "network-lock-timeout", default_value_t = DEFAULT_NETWORK_LOCK_TIMEOUT_SECS)]
    pub network_lock_timeout_secs: u64,

    /// Seconds to wait for an account lock during network setup
    #[arg(long = "account-lock-timeout", default_value_t = DEFAULT_ACCOUNT_LOCK_TIMEOUT_SECS)]
    pub account_lock_timeout_secs: u64,

    /// Seconds a GC pass waits for the global GC lock
    #[arg(long = "gc-lock-timeout", default_value_t = DEFAULT_GC_LOCK_TIMEOUT_SECS)]
    pub gc_lock_timeout_secs: u64,

    /// DNS suffix for guest networks without their own domain
    #[arg(long = "guest-domain-suffix", default_value = DEFAULT_GUEST_DOMAIN_SUFFIX)]
    pub guest_domain_suffix: String,

    /// Default NIC throttling rate in Mbps
    #[arg(long = "network-throttling-rate", default_value_t = DEFAULT_NETWORK_THROTTLING_RATE)]
    pub network_throttling_rate_mbps: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network_gc_wait_secs: DEFAULT_GC_WAIT_SECS,
            network_gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            network_lock_timeout_secs: DEFAULT_NETWORK_LOCK_TIMEOUT_SECS,
            account_lock_timeout_secs: DEFAULT_ACCOUNT_LOCK_TIMEOUT_SECS,
            gc_lock_timeout_secs: DEFAULT_GC_LOCK_TIMEOUT_SECS,
            guest_domain_suffix: DEFAULT_GUEST_DOMAIN_SUFFIX.to_string(),
            network_throttling_rate_mbps: DEFAULT_NETWORK_THROTTLING_RATE,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_gc_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "network_gc_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn gc_wait(&self) -> chrono::Duration {
        // chrono panics above i64::MAX milliseconds
        let secs = self.network_gc_wait_secs.min(i64::MAX as u64 / 1000) as i64;
        chrono::Duration::seconds(secs)
    }

    /// Never zero, tokio intervals reject a zero period.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.network_gc_interval_secs.max(1))
    }

    pub fn network_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.network_lock_timeout_secs)
    }

    pub fn account_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.account_lock_timeout_secs)
    }

    pub fn gc_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.gc_lock_timeout_secs)
    }
}
