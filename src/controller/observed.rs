//! Observed-state collection.
//!
//! Snapshots everything the diff engine needs about one cluster: the root
//! resource, its member pods keyed by ordinal, the router replica set, the
//! services, and the group's view of each member. Collection only reads.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use crate::controller::common::{has_finalizer, is_pod_ready, is_terminating, not_ready_since};
use crate::controller::error::Result;
use crate::crd::{InnoDBCluster, MemberRole};
use crate::group::{GroupAdmin, MemberState};
use crate::resources::common::{
    CLUSTER_FINALIZER, MEMBERSHIP_FINALIZER, member_selector, parse_ordinal, router_name,
};
use crate::resources::services::ServiceKind;
use crate::store::{ObjectKey, Stores};

/// One member pod as observed.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedMember {
    pub ordinal: i32,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub has_membership_finalizer: bool,
    /// Deletion requested
    pub deleting: bool,
    /// Pod reports Ready
    pub ready: bool,
    /// When the pod last became not ready, `None` while ready
    pub not_ready_since: Option<jiff::Timestamp>,
    pub role: MemberRole,
    /// Group still lists the member
    pub in_group: bool,
}

impl ObservedMember {
    /// Build from a pod and the group's view of it.
    pub fn from_pod(ordinal: i32, pod: &Pod, state: MemberState) -> Self {
        Self {
            ordinal,
            name: pod.name_any(),
            labels: pod.labels().clone(),
            has_membership_finalizer: has_finalizer(&pod.metadata, MEMBERSHIP_FINALIZER),
            deleting: is_terminating(&pod.metadata),
            ready: is_pod_ready(pod),
            not_ready_since: not_ready_since(pod),
            role: state.role,
            in_group: state.in_group,
        }
    }

    /// Live, ready and part of the group.
    pub fn is_online(&self) -> bool {
        self.ready && !self.deleting && self.in_group
    }
}

/// The router replica set as observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservedRouter {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub deleting: bool,
}

/// Snapshot of one cluster and everything it owns.
#[derive(Clone, Debug)]
pub struct ObservedCluster {
    pub cluster: InnoDBCluster,
    pub members: BTreeMap<i32, ObservedMember>,
    pub router: Option<ObservedRouter>,
    pub services: BTreeSet<ServiceKind>,
}

impl ObservedCluster {
    pub fn name(&self) -> String {
        self.cluster.name_any()
    }

    pub fn namespace(&self) -> String {
        self.cluster.namespace().unwrap_or_default()
    }

    pub fn has_cluster_finalizer(&self) -> bool {
        has_finalizer(&self.cluster.metadata, CLUSTER_FINALIZER)
    }

    /// Deletion of the cluster has been requested.
    pub fn is_deleting(&self) -> bool {
        is_terminating(&self.cluster.metadata)
    }

    /// Online members among ordinals `0..instances`.
    ///
    /// Surplus members awaiting removal are not counted, so the result
    /// never exceeds `instances`.
    pub fn online_count(&self, instances: i32) -> i32 {
        self.members
            .range(..instances.max(0))
            .filter(|(_, m)| m.is_online())
            .count() as i32
    }
}

/// Collect the observed state of the cluster at `key`.
///
/// Fails with `NotFound` if the cluster itself is absent. A missing router
/// replica set or service is recorded as absent.
pub async fn collect(
    stores: &Stores,
    group: &dyn GroupAdmin,
    key: &ObjectKey,
) -> Result<ObservedCluster> {
    let cluster = stores.clusters.get(&key.namespace, &key.name).await?;

    let pods: Vec<Pod> = stores
        .pods
        .list(&key.namespace, &member_selector(&key.name))
        .await?
        .into_iter()
        .filter(|p| parse_ordinal(&key.name, &p.name_any()).is_some())
        .collect();
    let states = group.member_states(&cluster, &pods).await?;

    let members = pods
        .iter()
        .filter_map(|pod| {
            let ordinal = parse_ordinal(&key.name, &pod.name_any())?;
            let state = states.get(&pod.name_any()).copied().unwrap_or_default();
            Some((ordinal, ObservedMember::from_pod(ordinal, pod, state)))
        })
        .collect();

    let router = match stores
        .replica_sets
        .get(&key.namespace, &router_name(&key.name))
        .await
    {
        Ok(rs) => Some(ObservedRouter {
            replicas: rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            ready_replicas: rs.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
            deleting: is_terminating(&rs.metadata),
        }),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let mut services = BTreeSet::new();
    for kind in ServiceKind::ALL {
        match stores
            .services
            .get(&key.namespace, &kind.service_name(&key.name))
            .await
        {
            Ok(_) => {
                services.insert(kind);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    let observed = ObservedCluster {
        cluster,
        members,
        router,
        services,
    };
    debug!(
        cluster = %key,
        members = observed.members.len(),
        online = observed.online_count(observed.cluster.spec.instances),
        router = ?observed.router,
        "Collected observed state"
    );
    Ok(observed)
}
