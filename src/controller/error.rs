//! Error types for the controller.
//!
//! Defines the error taxonomy with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error that has no more specific classification
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object is absent from the store
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Create of an object that already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic-concurrency collision on write
    #[error("conflict writing {kind} {name}")]
    Conflict { kind: String, name: String },

    /// Conflicts kept occurring after re-fetching the object
    #[error("gave up writing {kind} {name} after {attempts} conflicting attempts")]
    ConflictExhausted {
        kind: String,
        name: String,
        attempts: u32,
    },

    /// Network failure, timeout or server-side error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Removing a member would leave the group without a majority
    #[error("Quorum at risk: {0}")]
    QuorumRisk(String),

    /// Desired state violates an invariant
    #[error("Invalid spec: {0}")]
    SpecInvalid(String),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Operator configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a `NotFound` for an object kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Classify a kube error for the object it was returned for.
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Error::not_found(kind, name),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Error::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code >= 500 || resp.code == 429 => {
                Error::Transient(format!("{kind} {name}: {}", resp.message))
            }
            kube::Error::Service(_) | kube::Error::HyperError(_) => {
                Error::Transient(format!("{kind} {name}: {err}"))
            }
            _ => Error::Kube(err),
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_) | Error::Conflict { .. } => true,
            Error::NotFound { .. }
            | Error::AlreadyExists { .. }
            | Error::ConflictExhausted { .. }
            | Error::QuorumRisk(_)
            | Error::SpecInvalid(_)
            | Error::MissingField(_)
            | Error::Config(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        match self {
            Error::QuorumRisk(_) => Duration::from_secs(15),
            Error::SpecInvalid(_) => Duration::from_secs(300),
            _ if self.is_retryable() => Duration::from_secs(5),
            _ => Duration::from_secs(60),
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
