//! Reconciliation loop for InnoDBCluster.
//!
//! Every cycle is level-triggered: collect the observed state, recompute
//! the full action list, derive the phase through the state machine,
//! execute the actions and publish the status. Nothing is carried between
//! cycles except the per-cluster failure count used for backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action as ControllerAction;
use tracing::{debug, error, info, warn};

use crate::controller::cluster_state_machine::{
    ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult, determine_event,
};
use crate::controller::context::Context;
use crate::controller::diff::{Action, DesiredState, diff, teardown};
use crate::controller::error::{Error, Result};
use crate::controller::executor::{ExecutionReport, execute};
use crate::controller::observed::{ObservedCluster, collect};
use crate::controller::retry::{RetryConfig, jitter};
use crate::controller::status::{StatusInput, compute_status, publish_status};
use crate::crd::{ClusterPhase, InnoDBCluster};
use crate::store::ObjectKey;

/// Requeue while the cluster is converging or actions were applied
pub const CONVERGING_REQUEUE: Duration = Duration::from_secs(2);
/// Requeue while a member is failing
pub const DEGRADED_REQUEUE: Duration = Duration::from_secs(10);
/// Periodic resync of a stable cluster
pub const STABLE_REQUEUE: Duration = Duration::from_secs(60);
/// Requeue after the spec failed validation
pub const SPEC_INVALID_REQUEUE: Duration = Duration::from_secs(300);

/// What one reconciliation cycle did.
#[derive(Clone, Debug)]
pub struct ReconcileOutcome {
    pub phase: ClusterPhase,
    pub actions: Vec<Action>,
    pub report: ExecutionReport,
    /// `None` once the cluster is gone
    pub requeue_after: Option<Duration>,
}

/// Members below the desired count that have been not ready for longer
/// than `grace`.
pub fn failed_members(
    observed: &ObservedCluster,
    instances: i32,
    grace: Duration,
    now: jiff::Timestamp,
) -> i32 {
    let grace = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
    observed
        .members
        .values()
        .filter(|m| m.ordinal < instances && !m.deleting && !m.ready)
        .filter(|m| {
            m.not_ready_since
                .is_some_and(|since| now.as_second() - since.as_second() >= grace)
        })
        .count() as i32
}

/// Resolve the next phase, logging transitions the table rejects.
fn next_phase(
    current: ClusterPhase,
    event: ClusterEvent,
    ctx: &TransitionContext,
    name: &str,
) -> ClusterPhase {
    let machine = ClusterStateMachine::new();
    // A live cluster passes through Deleting before it can be drained.
    let current = if event == ClusterEvent::MembersDrained
        && !matches!(current, ClusterPhase::Deleting | ClusterPhase::Deleted)
    {
        machine
            .transition(&current, ClusterEvent::DeletionRequested, ctx)
            .next_phase(current)
    } else {
        current
    };

    let result = machine.transition(&current, event, ctx);
    match &result {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } if from != to => {
            info!(cluster = %name, %from, %to, %event, "{description}");
        }
        TransitionResult::Success { .. } => {}
        TransitionResult::InvalidTransition { current, event } => {
            warn!(cluster = %name, %current, %event, "Invalid phase transition, keeping phase");
        }
        TransitionResult::GuardFailed {
            from, event, reason, ..
        } => {
            debug!(cluster = %name, %from, %event, %reason, "Transition guard failed");
        }
    }
    result.next_phase(current)
}

/// Backoff after `failures` consecutive failed cycles.
fn failure_backoff(failures: u32) -> Duration {
    let config = RetryConfig {
        initial_delay: CONVERGING_REQUEUE,
        max_delay: SPEC_INVALID_REQUEUE,
        ..Default::default()
    };
    jitter(config.delay_for(failures))
}

/// Reconcile the InnoDBCluster at `key`
///
/// Fails with `NotFound` if the cluster no longer exists.
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<ReconcileOutcome> {
    let start_time = Instant::now();
    debug!(cluster = %key, "Reconciling InnoDBCluster");

    let observed = collect(&ctx.stores, ctx.group.as_ref(), key).await?;
    let cluster = &observed.cluster;
    let name = observed.name();
    let current_phase = cluster.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let deleting = observed.is_deleting();

    let (actions, spec_error) = if deleting {
        (teardown(&observed), None)
    } else {
        match DesiredState::from_cluster(cluster) {
            Ok(desired) => (diff(&desired, &observed), None),
            Err(Error::SpecInvalid(message)) => {
                warn!(cluster = %key, error = %message, "Spec validation failed");
                ctx.publish_warning_event(
                    cluster,
                    "ValidationFailed",
                    "Validating",
                    Some(message.clone()),
                )
                .await;
                (Vec::new(), Some(message))
            }
            Err(e) => return Err(e),
        }
    };

    let instances = if deleting { 0 } else { cluster.spec.instances };
    let removals = actions.iter().filter(|a| a.is_member_removal()).count();
    let transition_ctx = TransitionContext::new(instances, observed.online_count(instances))
        .with_failed(failed_members(
            &observed,
            instances,
            ctx.settings.member_failure_grace,
            jiff::Timestamp::now(),
        ))
        .with_actions(actions.len(), removals)
        .with_drained(deleting && observed.members.is_empty() && observed.router.is_none());

    let phase = if spec_error.is_some() {
        current_phase
    } else {
        let event = determine_event(&transition_ctx, deleting);
        next_phase(current_phase, event, &transition_ctx, &name)
    };
    if phase != current_phase {
        ctx.publish_normal_event(
            cluster,
            "PhaseChanged",
            "Reconciling",
            Some(format!("{current_phase} -> {phase}")),
        )
        .await;
        if let Some(state) = &ctx.health_state {
            state.metrics.record_phase_transition(&phase.to_string());
        }
    }

    debug!(cluster = %key, %phase, actions = actions.len(), "Executing actions");
    let report = execute(ctx, cluster, &actions).await;

    if report.quorum_blocked() {
        ctx.publish_warning_event(
            cluster,
            "QuorumAtRisk",
            "RemovingMember",
            Some("Member removal deferred to keep a majority online".to_string()),
        )
        .await;
    }
    for failure in report.failed.iter().filter(|f| !f.quorum_risk) {
        ctx.publish_warning_event(
            cluster,
            "ActionFailed",
            failure.action.kind(),
            Some(failure.error.clone()),
        )
        .await;
    }

    let status = compute_status(
        &observed,
        StatusInput {
            phase,
            spec_error: spec_error.as_deref(),
            report: &report,
        },
    );
    publish_status(
        &ctx.stores,
        &key.namespace,
        &key.name,
        &status,
        ctx.settings.conflict_attempts,
    )
    .await?;

    let failures = if report.failed.is_empty() {
        ctx.reset_failures(key);
        0
    } else {
        ctx.record_failure(key)
    };

    if let Some(state) = &ctx.health_state {
        state.metrics.record_reconcile(
            &key.namespace,
            &key.name,
            start_time.elapsed().as_secs_f64(),
        );
        state.metrics.set_instances(
            &key.namespace,
            &key.name,
            i64::from(cluster.spec.instances),
            i64::from(observed.online_count(cluster.spec.instances)),
        );
    }

    let requeue_after = match phase {
        ClusterPhase::Deleted => None,
        _ if spec_error.is_some() => Some(SPEC_INVALID_REQUEUE),
        _ if report.quorum_blocked() => Some(Error::QuorumRisk(String::new()).requeue_after()),
        _ if failures > 0 => Some(failure_backoff(failures)),
        _ if report.made_progress() || !report.deferred.is_empty() => Some(CONVERGING_REQUEUE),
        ClusterPhase::Stable => Some(STABLE_REQUEUE),
        ClusterPhase::Degraded => Some(DEGRADED_REQUEUE),
        _ => Some(CONVERGING_REQUEUE),
    };

    info!(
        cluster = %key,
        %phase,
        applied = report.applied.len(),
        failed = report.failed.len(),
        requeue = ?requeue_after,
        "Reconcile finished"
    );
    Ok(ReconcileOutcome {
        phase,
        actions,
        report,
        requeue_after,
    })
}

/// Controller entry point: reconcile `obj` and turn the requeue delay
/// into a controller action.
pub async fn reconcile_cluster(
    obj: Arc<InnoDBCluster>,
    ctx: Arc<Context>,
) -> Result<ControllerAction> {
    let key = ObjectKey::of(obj.as_ref())
        .ok_or_else(|| Error::MissingField("metadata.namespace/name".to_string()))?;
    let outcome = reconcile(&key, &ctx).await?;
    Ok(match outcome.requeue_after {
        Some(delay) => ControllerAction::requeue(delay),
        None => ControllerAction::await_change(),
    })
}

/// Error policy for the controller
pub fn error_policy(
    obj: Arc<InnoDBCluster>,
    error: &Error,
    ctx: Arc<Context>,
) -> ControllerAction {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let key = ObjectKey::new(&namespace, &name);

    if error.is_not_found() {
        debug!(cluster = %key, "Resource not found (likely deleted)");
        ctx.reset_failures(&key);
        return ControllerAction::await_change();
    }

    // Record error metric
    if let Some(state) = &ctx.health_state {
        state.metrics.record_error(&namespace, &name);
    }

    let failures = ctx.record_failure(&key);
    if error.is_retryable() {
        warn!(cluster = %key, error = %error, failures, "Retryable error, will retry");
        ControllerAction::requeue(error.requeue_after().max(failure_backoff(failures)))
    } else {
        error!(cluster = %key, error = %error, "Non-retryable error");
        ControllerAction::requeue(error.requeue_after())
    }
}
