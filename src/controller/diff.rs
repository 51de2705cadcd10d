//! Diff engine.
//!
//! Pure functions from (desired, observed) to an ordered list of actions.
//! The same inputs always yield the same list, so every cycle can recompute
//! the full plan from scratch.
//!
//! ## Ordering
//!
//! 1. Cluster finalizer and services
//! 2. Per-member finalizer and label repair, and scale-up, by ascending ordinal
//! 3. Scale-down by descending ordinal
//! 4. Membership-finalizer release for evicted members, descending
//! 5. Router tier, only once member topology is stable

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::controller::error::Result;
use crate::controller::observed::{ObservedCluster, ObservedMember};
use crate::controller::validation::validate_spec;
use crate::crd::{InnoDBCluster, MemberRole};
use crate::resources::common::{
    CLUSTER_FINALIZER, LABEL_CLUSTER_ROLE, MEMBERSHIP_FINALIZER, member_labels,
};
use crate::resources::services::ServiceKind;

/// Desired topology derived from a validated spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredState {
    pub cluster_name: String,
    pub instances: i32,
    pub router_instances: i32,
}

impl DesiredState {
    /// Validate the spec and derive the desired topology.
    pub fn from_cluster(cluster: &InnoDBCluster) -> Result<Self> {
        validate_spec(cluster)?;
        Ok(Self {
            cluster_name: cluster.name_any(),
            instances: cluster.spec.instances,
            router_instances: cluster.spec.router_instances(),
        })
    }
}

/// Object a finalizer action applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FinalizerTarget {
    Cluster,
    Member(i32),
}

/// Object an action writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionTarget {
    Cluster,
    Member(i32),
    Router,
    Service(ServiceKind),
}

/// A single change to apply to the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    CreateMemberPod(i32),
    DeleteMemberPod(i32),
    CreateRouterDeployment(i32),
    ScaleRouterDeployment(i32),
    DeleteRouterDeployment,
    /// Replace the member pod's labels with exactly this set
    UpdateLabels(i32, BTreeMap<String, String>),
    AddFinalizer(FinalizerTarget, String),
    RemoveFinalizer(FinalizerTarget, String),
    EnsureService(ServiceKind),
    DeleteService(ServiceKind),
}

/// Execution stage of an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Cluster finalizer and services
    Prepare,
    /// Member creation and repair
    Members,
    /// Member removal and finalizer release
    Removal,
    /// Router tier
    Router,
    /// Service deletion and cluster finalizer release
    Teardown,
}

impl Stage {
    /// Actions in this stage may run concurrently. Actions sharing a
    /// target still run in order.
    pub fn is_concurrent(&self) -> bool {
        matches!(self, Stage::Prepare | Stage::Members)
    }

    /// This stage runs only when every earlier stage succeeded.
    pub fn is_barrier(&self) -> bool {
        matches!(self, Stage::Router | Stage::Teardown)
    }
}

impl Action {
    pub fn stage(&self) -> Stage {
        match self {
            Action::AddFinalizer(FinalizerTarget::Cluster, _) | Action::EnsureService(_) => {
                Stage::Prepare
            }
            Action::AddFinalizer(FinalizerTarget::Member(_), _)
            | Action::UpdateLabels(..)
            | Action::CreateMemberPod(_) => Stage::Members,
            Action::DeleteMemberPod(_)
            | Action::RemoveFinalizer(FinalizerTarget::Member(_), _) => Stage::Removal,
            Action::CreateRouterDeployment(_)
            | Action::ScaleRouterDeployment(_)
            | Action::DeleteRouterDeployment => Stage::Router,
            Action::DeleteService(_) | Action::RemoveFinalizer(FinalizerTarget::Cluster, _) => {
                Stage::Teardown
            }
        }
    }

    /// The object this action writes.
    pub fn target(&self) -> ActionTarget {
        match self {
            Action::CreateMemberPod(ordinal)
            | Action::DeleteMemberPod(ordinal)
            | Action::UpdateLabels(ordinal, _)
            | Action::AddFinalizer(FinalizerTarget::Member(ordinal), _)
            | Action::RemoveFinalizer(FinalizerTarget::Member(ordinal), _) => {
                ActionTarget::Member(*ordinal)
            }
            Action::AddFinalizer(FinalizerTarget::Cluster, _)
            | Action::RemoveFinalizer(FinalizerTarget::Cluster, _) => ActionTarget::Cluster,
            Action::CreateRouterDeployment(_)
            | Action::ScaleRouterDeployment(_)
            | Action::DeleteRouterDeployment => ActionTarget::Router,
            Action::EnsureService(kind) | Action::DeleteService(kind) => {
                ActionTarget::Service(*kind)
            }
        }
    }

    /// Short name used for metrics and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateMemberPod(_) => "CreateMemberPod",
            Action::DeleteMemberPod(_) => "DeleteMemberPod",
            Action::CreateRouterDeployment(_) => "CreateRouterDeployment",
            Action::ScaleRouterDeployment(_) => "ScaleRouterDeployment",
            Action::DeleteRouterDeployment => "DeleteRouterDeployment",
            Action::UpdateLabels(..) => "UpdateLabels",
            Action::AddFinalizer(..) => "AddFinalizer",
            Action::RemoveFinalizer(..) => "RemoveFinalizer",
            Action::EnsureService(_) => "EnsureService",
            Action::DeleteService(_) => "DeleteService",
        }
    }

    /// Whether the action shrinks the member set.
    pub fn is_member_removal(&self) -> bool {
        matches!(self, Action::DeleteMemberPod(_))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::CreateMemberPod(o) => write!(f, "CreateMemberPod({o})"),
            Action::DeleteMemberPod(o) => write!(f, "DeleteMemberPod({o})"),
            Action::CreateRouterDeployment(r) => write!(f, "CreateRouterDeployment({r})"),
            Action::ScaleRouterDeployment(r) => write!(f, "ScaleRouterDeployment({r})"),
            Action::DeleteRouterDeployment => write!(f, "DeleteRouterDeployment"),
            Action::UpdateLabels(o, _) => write!(f, "UpdateLabels({o})"),
            Action::AddFinalizer(t, k) => write!(f, "AddFinalizer({t:?}, {k})"),
            Action::RemoveFinalizer(t, k) => write!(f, "RemoveFinalizer({t:?}, {k})"),
            Action::EnsureService(s) => write!(f, "EnsureService({s})"),
            Action::DeleteService(s) => write!(f, "DeleteService({s})"),
        }
    }
}

/// Labels a live member should carry.
///
/// While the group reports no role the existing role label is kept, so a
/// member briefly dropping out does not flap its labels.
pub fn desired_member_labels(cluster: &str, member: &ObservedMember) -> BTreeMap<String, String> {
    let mut labels = member_labels(cluster, member.role);
    if member.role == MemberRole::Unknown
        && let Some(role) = member.labels.get(LABEL_CLUSTER_ROLE)
    {
        labels.insert(LABEL_CLUSTER_ROLE.to_string(), role.clone());
    }
    labels
}

/// Whether members `0..instances` are all present, live and ready, with no
/// surplus member left.
pub fn members_stable(instances: i32, observed: &ObservedCluster) -> bool {
    let complete = (0..instances).all(|ordinal| {
        observed
            .members
            .get(&ordinal)
            .is_some_and(|m| m.ready && !m.deleting)
    });
    let surplus = observed.members.keys().any(|&ordinal| ordinal >= instances);
    complete && !surplus
}

/// Release membership finalizers of members the group no longer lists.
fn release_evicted(observed: &ObservedCluster, actions: &mut Vec<Action>) {
    for member in observed.members.values().rev() {
        if member.deleting && !member.in_group && member.has_membership_finalizer {
            actions.push(Action::RemoveFinalizer(
                FinalizerTarget::Member(member.ordinal),
                MEMBERSHIP_FINALIZER.to_string(),
            ));
        }
    }
}

/// Compute the actions moving `observed` toward `desired`.
pub fn diff(desired: &DesiredState, observed: &ObservedCluster) -> Vec<Action> {
    let mut actions = Vec::new();

    if !observed.has_cluster_finalizer() {
        actions.push(Action::AddFinalizer(
            FinalizerTarget::Cluster,
            CLUSTER_FINALIZER.to_string(),
        ));
    }
    for kind in ServiceKind::ALL {
        if !observed.services.contains(&kind) {
            actions.push(Action::EnsureService(kind));
        }
    }

    for ordinal in 0..desired.instances {
        let Some(member) = observed.members.get(&ordinal) else {
            actions.push(Action::CreateMemberPod(ordinal));
            continue;
        };
        if member.deleting {
            continue;
        }
        if !member.has_membership_finalizer {
            actions.push(Action::AddFinalizer(
                FinalizerTarget::Member(ordinal),
                MEMBERSHIP_FINALIZER.to_string(),
            ));
        }
        let labels = desired_member_labels(&desired.cluster_name, member);
        if member.labels != labels {
            actions.push(Action::UpdateLabels(ordinal, labels));
        }
    }

    for member in observed.members.values().rev() {
        if member.ordinal >= desired.instances && !member.deleting {
            actions.push(Action::DeleteMemberPod(member.ordinal));
        }
    }

    release_evicted(observed, &mut actions);

    if members_stable(desired.instances, observed) {
        let wanted = desired.router_instances;
        match observed.router {
            None if wanted > 0 => actions.push(Action::CreateRouterDeployment(wanted)),
            Some(router) if router.deleting => {}
            Some(_) if wanted == 0 => actions.push(Action::DeleteRouterDeployment),
            Some(router) if router.replicas != wanted => {
                actions.push(Action::ScaleRouterDeployment(wanted))
            }
            _ => {}
        }
    }

    actions
}

/// Compute the actions tearing down a cluster whose deletion was requested.
///
/// Router first, then members by descending ordinal, then finalizer
/// release. Services and the cluster finalizer go only once no member pod
/// and no router remain.
pub fn teardown(observed: &ObservedCluster) -> Vec<Action> {
    let mut actions = Vec::new();

    if observed.router.is_some_and(|r| !r.deleting) {
        actions.push(Action::DeleteRouterDeployment);
    }
    for member in observed.members.values().rev() {
        if !member.deleting {
            actions.push(Action::DeleteMemberPod(member.ordinal));
        }
    }
    release_evicted(observed, &mut actions);

    if observed.members.is_empty() && observed.router.is_none() {
        for kind in ServiceKind::ALL {
            if observed.services.contains(&kind) {
                actions.push(Action::DeleteService(kind));
            }
        }
        if observed.has_cluster_finalizer() {
            actions.push(Action::RemoveFinalizer(
                FinalizerTarget::Cluster,
                CLUSTER_FINALIZER.to_string(),
            ));
        }
    }

    actions
}
