//! Operator configuration from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::controller::context::Settings;
use crate::controller::error::{Error, Result};
use crate::controller::retry::RetryConfig;

/// Default port for health and metrics endpoints
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default bound on concurrently reconciled clusters
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Runtime configuration of the operator process.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace to watch, all namespaces when `None`
    pub watch_namespace: Option<String>,
    /// Identity used for the leader lease and events
    pub pod_name: String,
    /// Namespace holding the leader lease
    pub pod_namespace: String,
    pub health_port: u16,
    pub max_concurrent_reconciles: usize,
    /// Attempts per action, including the first
    pub action_max_attempts: u32,
    /// Read-modify-write attempts before giving up
    pub conflict_max_attempts: u32,
    pub member_failure_grace: Duration,
}

impl OperatorConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pod_name = lookup("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });
        let pod_namespace = lookup("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });

        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            pod_name,
            pod_namespace,
            health_port: parse(&lookup, "HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
            max_concurrent_reconciles: positive(
                &lookup,
                "MAX_CONCURRENT_RECONCILES",
                DEFAULT_MAX_CONCURRENT,
            )?,
            action_max_attempts: positive(&lookup, "ACTION_MAX_ATTEMPTS", 5)?,
            conflict_max_attempts: positive(&lookup, "CONFLICT_MAX_ATTEMPTS", 5)?,
            member_failure_grace: Duration::from_secs(parse(
                &lookup,
                "MEMBER_FAILURE_GRACE_SECS",
                30,
            )?),
        })
    }

    /// Reconciliation settings derived from this configuration
    pub fn settings(&self) -> Settings {
        Settings {
            retry: RetryConfig::with_max_attempts(self.action_max_attempts),
            conflict_attempts: self.conflict_max_attempts,
            member_failure_grace: self.member_failure_grace,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse(lookup, key, default)?;
    if value <= T::default() {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}
