//! Status management.
//!
//! Computes the InnoDBCluster status from the observed state, the phase
//! and the outcome of the last execution, and publishes it through the
//! status subresource.

use kube::ResourceExt;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::controller::executor::ExecutionReport;
use crate::controller::observed::ObservedCluster;
use crate::crd::{
    ClusterPhase, ClusterState, ClusterStatusSummary, Condition, ConditionType,
    InnoDBClusterStatus, MemberStatus,
};
use crate::store::Stores;

/// Builder for managing conditions list
///
/// A condition whose status matches the previous one keeps the previous
/// `lastTransitionTime`.
pub struct ConditionBuilder {
    previous: Vec<Condition>,
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a builder that carries transition times over from `previous`
    pub fn new(previous: &[Condition]) -> Self {
        Self {
            previous: previous.to_vec(),
            conditions: Vec::new(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(prev) = self
            .previous
            .iter()
            .find(|c| c.r#type == condition.r#type && c.status == condition.status)
        {
            condition.last_transition_time = prev.last_transition_time.clone();
        }
        // Find and replace existing condition of same type
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set a condition from its parts
    pub fn condition(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::new(
            condition_type,
            status,
            reason,
            message,
            generation,
        ))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Find a condition by type
pub fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    let wanted = condition_type.to_string();
    conditions.iter().find(|c| c.r#type == wanted)
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(Condition::is_true)
}

/// Cluster-wide state for a phase and online member count.
pub fn cluster_state(phase: ClusterPhase, online: i32) -> ClusterState {
    match phase {
        ClusterPhase::Deleting | ClusterPhase::Deleted => ClusterState::Finalizing,
        ClusterPhase::Initializing => ClusterState::Initializing,
        _ if online == 0 => ClusterState::Offline,
        ClusterPhase::Degraded => ClusterState::Degraded,
        _ => ClusterState::Online,
    }
}

/// Inputs to status computation besides the observed state.
#[derive(Clone, Copy, Debug)]
pub struct StatusInput<'a> {
    pub phase: ClusterPhase,
    /// Validation message when the spec is invalid
    pub spec_error: Option<&'a str>,
    pub report: &'a ExecutionReport,
}

/// Compute the status to publish for `observed`.
pub fn compute_status(observed: &ObservedCluster, input: StatusInput<'_>) -> InnoDBClusterStatus {
    let cluster = &observed.cluster;
    let previous = cluster.status.clone().unwrap_or_default();
    let generation = cluster.metadata.generation;
    let desired = cluster.spec.instances;
    let online = observed.online_count(desired);
    let phase = input.phase;

    let members = observed
        .members
        .values()
        .map(|m| MemberStatus {
            name: m.name.clone(),
            ordinal: m.ordinal,
            role: m.role,
            ready: m.ready,
        })
        .collect();

    let mut conditions = ConditionBuilder::new(&previous.conditions);
    if phase == ClusterPhase::Stable {
        conditions.condition(
            ConditionType::Ready,
            true,
            "AllMembersOnline",
            &format!("{online}/{desired} members online"),
            generation,
        );
    } else {
        conditions.condition(
            ConditionType::Ready,
            false,
            &phase.to_string(),
            &format!("{online}/{desired} members online"),
            generation,
        );
    }

    let progressing = matches!(
        phase,
        ClusterPhase::Initializing
            | ClusterPhase::Growing
            | ClusterPhase::Shrinking
            | ClusterPhase::Deleting
    );
    conditions.condition(
        ConditionType::Progressing,
        progressing,
        &phase.to_string(),
        if progressing {
            "Reconciling toward desired topology"
        } else {
            "No reconciliation in progress"
        },
        generation,
    );

    let failed_members: Vec<&str> = observed
        .members
        .values()
        .filter(|m| !m.ready && !m.deleting)
        .map(|m| m.name.as_str())
        .collect();
    if phase == ClusterPhase::Degraded {
        conditions.condition(
            ConditionType::Degraded,
            true,
            "MemberFailure",
            &format!("Members not ready: {}", failed_members.join(", ")),
            generation,
        );
    } else {
        conditions.condition(
            ConditionType::Degraded,
            false,
            "MembersHealthy",
            "No member failing",
            generation,
        );
    }

    let action_failures: Vec<String> = input
        .report
        .failed
        .iter()
        .filter(|f| !f.quorum_risk)
        .map(|f| format!("{}: {}", f.action, f.error))
        .collect();
    if action_failures.is_empty() {
        conditions.condition(
            ConditionType::ActionFailed,
            false,
            "NoFailures",
            "All actions succeeded",
            generation,
        );
    } else {
        conditions.condition(
            ConditionType::ActionFailed,
            true,
            "RetriesExhausted",
            &action_failures.join("; "),
            generation,
        );
    }

    if input.report.quorum_blocked() {
        let reason = if observed.is_deleting() {
            "PendingDelete"
        } else {
            "ScaleDownBlocked"
        };
        let message = input
            .report
            .failed
            .iter()
            .find(|f| f.quorum_risk)
            .map(|f| f.error.clone())
            .unwrap_or_default();
        conditions.condition(ConditionType::QuorumAtRisk, true, reason, &message, generation);
    } else {
        conditions.condition(
            ConditionType::QuorumAtRisk,
            false,
            "QuorumSafe",
            "Group keeps a majority online",
            generation,
        );
    }

    match input.spec_error {
        Some(message) => conditions.condition(
            ConditionType::SpecInvalid,
            true,
            "ValidationFailed",
            message,
            generation,
        ),
        None => conditions.condition(
            ConditionType::SpecInvalid,
            false,
            "Valid",
            "Spec is valid",
            generation,
        ),
    };

    InnoDBClusterStatus {
        cluster: Some(ClusterStatusSummary {
            status: cluster_state(phase, online),
            online_instances: online,
        }),
        version: Some(cluster.spec.server_version()),
        phase,
        members,
        conditions: conditions.build(),
        observed_generation: generation,
        create_time: previous
            .create_time
            .or_else(|| Some(jiff::Timestamp::now().to_string())),
    }
}

/// Write `status` to the cluster's status subresource.
///
/// Re-reads the cluster and retries on conflict. Skips the write when the
/// stored status already matches. A cluster that disappeared is not an
/// error. Returns whether a write happened.
pub async fn publish_status(
    stores: &Stores,
    namespace: &str,
    name: &str,
    status: &InnoDBClusterStatus,
    attempts: u32,
) -> Result<bool> {
    for attempt in 1..=attempts {
        let mut cluster = match stores.clusters.get(namespace, name).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if cluster.status.as_ref() == Some(status) {
            return Ok(false);
        }
        cluster.status = Some(status.clone());
        match stores.clusters.replace_status(&cluster).await {
            Ok(_) => {
                debug!(cluster = %cluster.name_any(), phase = %status.phase, "Status updated");
                return Ok(true);
            }
            Err(e) if e.is_conflict() => {
                debug!(cluster = %name, attempt, "Status write conflict, re-fetching");
            }
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Err(Error::ConflictExhausted {
        kind: "InnoDBCluster".to_string(),
        name: name.to_string(),
        attempts,
    })
}
