//! Common resource generation utilities.
//!
//! Names, labels, finalizers and owner references shared by every object the
//! operator creates for an InnoDBCluster. The label keys and values are an
//! external contract: monitoring and test tooling select on them.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::{InnoDBCluster, MemberRole};

/// Label carrying the component (`mysqld` or `mysqlrouter`).
pub const LABEL_COMPONENT: &str = "component";
/// Label carrying the tier.
pub const LABEL_TIER: &str = "tier";
/// Label carrying the owning cluster's name.
pub const LABEL_CLUSTER: &str = "mysql.oracle.com/cluster";
/// Label carrying the member's role in the group.
pub const LABEL_CLUSTER_ROLE: &str = "mysql.oracle.com/cluster-role";

pub const COMPONENT_MYSQLD: &str = "mysqld";
pub const COMPONENT_ROUTER: &str = "mysqlrouter";
pub const TIER_MYSQL: &str = "mysql";

/// Finalizer on the InnoDBCluster guarding ordered teardown.
pub const CLUSTER_FINALIZER: &str = "mysql.oracle.com/cluster";
/// Finalizer on member pods held while the member is in the group.
pub const MEMBERSHIP_FINALIZER: &str = "mysql.oracle.com/membership";

/// Name of the member pod at `ordinal`.
pub fn member_pod_name(cluster: &str, ordinal: i32) -> String {
    format!("{cluster}-{ordinal}")
}

/// Ordinal of a member pod, if `pod_name` is `<cluster>-<ordinal>`.
pub fn parse_ordinal(cluster: &str, pod_name: &str) -> Option<i32> {
    let suffix = pod_name.strip_prefix(cluster)?.strip_prefix('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Name of the router replica set.
pub fn router_name(cluster: &str) -> String {
    format!("{cluster}-router")
}

/// Name of the headless service fronting member pods.
pub fn instances_service_name(cluster: &str) -> String {
    format!("{cluster}-instances")
}

/// Selector matching a cluster's member pods.
pub fn member_selector(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_COMPONENT.to_string(), COMPONENT_MYSQLD.to_string()),
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
    ])
}

/// Selector matching a cluster's router pods.
pub fn router_selector(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_COMPONENT.to_string(), COMPONENT_ROUTER.to_string()),
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
    ])
}

/// The full label set of a member pod.
///
/// Without a known role only the three static labels are present.
pub fn member_labels(cluster: &str, role: MemberRole) -> BTreeMap<String, String> {
    let mut labels = member_selector(cluster);
    labels.insert(LABEL_TIER.to_string(), TIER_MYSQL.to_string());
    if let Some(role) = role.label_value() {
        labels.insert(LABEL_CLUSTER_ROLE.to_string(), role.to_string());
    }
    labels
}

/// Labels of router pods and the router replica set.
pub fn router_labels(cluster: &str) -> BTreeMap<String, String> {
    let mut labels = router_selector(cluster);
    labels.insert(LABEL_TIER.to_string(), TIER_MYSQL.to_string());
    labels
}

/// Create owner reference for an InnoDBCluster
pub fn owner_reference(cluster: &InnoDBCluster) -> OwnerReference {
    OwnerReference {
        api_version: InnoDBCluster::api_version(&()).to_string(),
        kind: InnoDBCluster::kind(&()).to_string(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Pull secrets from the cluster spec in pod form.
pub fn image_pull_secrets(
    cluster: &InnoDBCluster,
) -> Option<Vec<k8s_openapi::api::core::v1::LocalObjectReference>> {
    cluster.spec.image_pull_secrets.as_ref().map(|secrets| {
        secrets
            .iter()
            .map(|s| k8s_openapi::api::core::v1::LocalObjectReference {
                name: s.name.clone(),
            })
            .collect()
    })
}
