//! Resource generation module.
//!
//! Contains utilities for generating Kubernetes resources owned by InnoDBCluster.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Member Pods | One pod per group member, named `<cluster>-<ordinal>` |
//! | Router ReplicaSet | Stateless MySQL Router tier |
//! | Router Service | Client entry point |
//! | Instances Service | Headless member DNS (publishNotReadyAddresses) |

pub mod common;
pub mod pods;
pub mod router;
pub mod services;

// Re-export commonly used items from common
pub use common::{CLUSTER_FINALIZER, MEMBERSHIP_FINALIZER, owner_reference};
pub use services::ServiceKind;
