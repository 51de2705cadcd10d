//! Database group membership.
//!
//! The reconciler needs two things from the database layer: each member's
//! role and whether it is still part of the group, and a way to evict a
//! member before its pod is deleted. [`GroupAdmin`] is that seam.
//! [`PodGroupView`] is the implementation shipped with the operator and
//! derives the group from pod state.

mod pod_view;
pub mod quorum;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

use crate::controller::error::Result;
use crate::crd::{InnoDBCluster, MemberRole};

pub use pod_view::PodGroupView;

/// A member as seen by the database group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemberState {
    pub role: MemberRole,
    /// Member is listed in the group (possibly offline)
    pub in_group: bool,
}

/// Outcome of an eviction request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eviction {
    /// Member has left the group, its pod may be deleted
    Evicted,
    /// Member is leaving, ask again later
    InProgress,
}

/// Administrative access to the database group.
#[async_trait]
pub trait GroupAdmin: Send + Sync {
    /// Role and membership of each pod, keyed by pod name.
    async fn member_states(
        &self,
        cluster: &InnoDBCluster,
        pods: &[Pod],
    ) -> Result<BTreeMap<String, MemberState>>;

    /// Remove a member from the group.
    ///
    /// Fails with `QuorumRisk` if the remaining members would lose quorum.
    async fn evict_member(&self, cluster: &InnoDBCluster, pod_name: &str) -> Result<Eviction>;
}
