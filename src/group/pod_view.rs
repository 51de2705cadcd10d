//! Group membership derived from pod state.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::quorum::check_removal;
use super::{Eviction, GroupAdmin, MemberState};
use crate::controller::common::{has_finalizer, is_pod_ready, is_terminating};
use crate::controller::error::{Error, Result};
use crate::crd::{InnoDBCluster, MemberRole};
use crate::resources::common::{MEMBERSHIP_FINALIZER, member_selector, parse_ordinal};
use crate::store::SharedStore;

/// [`GroupAdmin`] that treats pods as the group.
///
/// A pod is in the group until deletion is requested, and online while it
/// is Ready. The lowest online ordinal is the primary. Eviction, whether
/// before deleting a pod or before releasing its membership finalizer, is
/// refused when the members left would not hold a strict majority.
pub struct PodGroupView {
    pods: SharedStore<Pod>,
}

impl PodGroupView {
    pub fn new(pods: SharedStore<Pod>) -> Self {
        Self { pods }
    }
}

fn is_online(pod: &Pod) -> bool {
    !is_terminating(&pod.metadata) && is_pod_ready(pod)
}

#[async_trait]
impl GroupAdmin for PodGroupView {
    async fn member_states(
        &self,
        cluster: &InnoDBCluster,
        pods: &[Pod],
    ) -> Result<BTreeMap<String, MemberState>> {
        let cluster_name = cluster.name_any();
        let primary = pods
            .iter()
            .filter(|p| is_online(p))
            .filter_map(|p| parse_ordinal(&cluster_name, &p.name_any()))
            .min();

        Ok(pods
            .iter()
            .map(|pod| {
                let name = pod.name_any();
                let role = if !is_online(pod) {
                    MemberRole::Unknown
                } else if parse_ordinal(&cluster_name, &name) == primary {
                    MemberRole::Primary
                } else {
                    MemberRole::Secondary
                };
                let state = MemberState {
                    role,
                    in_group: !is_terminating(&pod.metadata),
                };
                (name, state)
            })
            .collect())
    }

    async fn evict_member(&self, cluster: &InnoDBCluster, pod_name: &str) -> Result<Eviction> {
        let namespace = cluster.namespace().unwrap_or_default();
        let pods = self
            .pods
            .list(&namespace, &member_selector(&cluster.name_any()))
            .await?;

        // A terminating target still counts while it holds the membership
        // finalizer: nothing has checked that the group can spare it yet.
        let members: Vec<(String, bool)> = pods
            .iter()
            .filter(|p| {
                !is_terminating(&p.metadata)
                    || (p.name_any() == pod_name
                        && has_finalizer(&p.metadata, MEMBERSHIP_FINALIZER))
            })
            .map(|p| (p.name_any(), is_online(p)))
            .collect();

        if !members.iter().any(|(name, _)| name == pod_name) {
            debug!(pod = %pod_name, "Member already out of the group");
            return Ok(Eviction::Evicted);
        }

        check_removal(&members, pod_name).map_err(|reason| {
            warn!(pod = %pod_name, %reason, "Refusing eviction");
            Error::QuorumRisk(reason)
        })?;

        debug!(pod = %pod_name, "Member evicted from group");
        Ok(Eviction::Evicted)
    }
}
