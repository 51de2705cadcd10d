//! Controller module for mysql-operator.
//!
//! Contains the reconciliation loop and its parts: observed-state
//! collection, the diff engine, the action executor, the phase state
//! machine and status publishing.

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod retry;
pub mod status;
pub mod validation;

// Reconciliation pipeline
pub mod cluster_reconciler;
pub mod cluster_state_machine;
pub mod diff;
pub mod executor;
pub mod observed;
