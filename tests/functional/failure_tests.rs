//! Quorum protection, member failure and injected store faults.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action as ControllerAction;
use mysql_operator::controller::cluster_reconciler::{
    CONVERGING_REQUEUE, DEGRADED_REQUEUE, SPEC_INVALID_REQUEUE, error_policy, reconcile_cluster,
};
use mysql_operator::controller::context::Settings;
use mysql_operator::controller::diff::{Action, FinalizerTarget};
use mysql_operator::controller::error::Error;
use mysql_operator::controller::status::{find_condition, is_condition_true};
use mysql_operator::crd::{ClusterPhase, ClusterState, ConditionType, InnoDBClusterStatus};
use mysql_operator::resources::common::{CLUSTER_FINALIZER, MEMBERSHIP_FINALIZER};
use mysql_operator::store::{Fault, FaultOp, ObjectKey, ObjectStore};

use crate::common::{TestPlatform, fast_settings, test_cluster};

fn status(platform: &TestPlatform, key: &ObjectKey) -> InnoDBClusterStatus {
    platform
        .cluster(key)
        .and_then(|c| c.status)
        .expect("status published")
}

#[tokio::test]
async fn test_scale_down_blocked_while_survivor_not_ready() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("fragile", 3, None))
        .await;
    platform.converge(&key, 10).await;

    platform.stall(&key, "fragile-0");
    platform.update_spec(&key, |spec| spec.instances = 1).await;

    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert_eq!(outcome.phase, ClusterPhase::Shrinking);
    assert!(outcome.report.quorum_blocked());
    assert_eq!(
        outcome.report.failed[0].action,
        Action::DeleteMemberPod(2)
    );
    assert!(outcome.report.skipped.contains(&Action::DeleteMemberPod(1)));
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(15)));
    assert_eq!(platform.member_ordinals(&key), vec![0, 1, 2]);
    assert!(
        platform
            .member_pods(&key)
            .iter()
            .all(|p| p.metadata.deletion_timestamp.is_none())
    );

    let blocked = status(&platform, &key);
    // Members 1 and 2 are online but beyond spec.instances.
    assert_eq!(blocked.online_instances(), 0);
    let condition =
        find_condition(&blocked.conditions, ConditionType::QuorumAtRisk).expect("condition");
    assert!(condition.is_true());
    assert_eq!(condition.reason, "ScaleDownBlocked");
    // Quorum deferral is not an action failure.
    assert!(!is_condition_true(
        &blocked.conditions,
        ConditionType::ActionFailed
    ));

    platform.recover(&key, "fragile-0");
    platform.converge(&key, 10).await;
    assert_eq!(platform.member_ordinals(&key), vec![0]);
    assert!(!is_condition_true(
        &status(&platform, &key).conditions,
        ConditionType::QuorumAtRisk
    ));
}

#[tokio::test]
async fn test_external_member_deletion_waits_for_majority() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("outside", 3, None))
        .await;
    platform.converge(&key, 10).await;

    platform.stall(&key, "outside-0");
    platform
        .memory
        .pods
        .delete(&key.namespace, "outside-1")
        .await
        .expect("deletion accepted");

    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert!(outcome.report.quorum_blocked());
    assert_eq!(
        outcome.report.failed[0].action,
        Action::RemoveFinalizer(
            FinalizerTarget::Member(1),
            MEMBERSHIP_FINALIZER.to_string()
        )
    );
    let held = platform
        .memory
        .pods
        .peek(&key.namespace, "outside-1")
        .expect("member held by its finalizer");
    assert!(held.metadata.deletion_timestamp.is_some());
    assert!(is_condition_true(
        &status(&platform, &key).conditions,
        ConditionType::QuorumAtRisk
    ));

    platform.recover(&key, "outside-0");
    let phases = platform.converge(&key, 10).await;
    assert_eq!(phases.last(), Some(&ClusterPhase::Stable));
    assert_eq!(platform.member_ordinals(&key), vec![0, 1, 2]);
    assert!(
        platform
            .member_pods(&key)
            .iter()
            .all(|p| p.metadata.deletion_timestamp.is_none())
    );
}

#[tokio::test]
async fn test_deletion_waits_while_quorum_at_risk() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("doomed", 3, None))
        .await;
    platform.converge(&key, 10).await;

    platform.stall(&key, "doomed-0");
    platform.delete_cluster(&key).await;

    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert_eq!(outcome.phase, ClusterPhase::Deleting);
    assert!(outcome.report.quorum_blocked());
    assert_eq!(outcome.report.failed[0].action, Action::DeleteMemberPod(2));
    assert_eq!(platform.member_ordinals(&key), vec![0, 1, 2]);

    let cluster = platform.cluster(&key).expect("cluster held by its finalizer");
    assert!(
        cluster
            .metadata
            .finalizers
            .is_some_and(|f| f.contains(&CLUSTER_FINALIZER.to_string()))
    );
    let pending = status(&platform, &key);
    let condition =
        find_condition(&pending.conditions, ConditionType::QuorumAtRisk).expect("condition");
    assert!(condition.is_true());
    assert_eq!(condition.reason, "PendingDelete");

    // Still blocked on the next cycle.
    platform.kubelet();
    let again = platform.reconcile(&key).await.expect("reconcile");
    assert!(again.report.quorum_blocked());
    assert!(platform.cluster(&key).is_some());

    platform.recover(&key, "doomed-0");
    platform.converge(&key, 15).await;
    assert!(platform.cluster(&key).is_none());
    assert!(platform.member_pods(&key).is_empty());
}

#[tokio::test]
async fn test_member_failure_degrades_cluster() {
    let platform = TestPlatform::with_settings(Settings {
        member_failure_grace: Duration::ZERO,
        ..fast_settings()
    });
    let key = platform
        .create_cluster(&test_cluster("flaky", 3, None))
        .await;
    platform.converge(&key, 10).await;

    platform.stall(&key, "flaky-2");
    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert_eq!(outcome.phase, ClusterPhase::Degraded);
    assert_eq!(outcome.requeue_after, Some(DEGRADED_REQUEUE));

    let degraded = status(&platform, &key);
    assert_eq!(degraded.online_instances(), 2);
    assert_eq!(
        degraded.cluster.map(|c| c.status),
        Some(ClusterState::Degraded)
    );
    assert!(is_condition_true(
        &degraded.conditions,
        ConditionType::Degraded
    ));
    assert!(!is_condition_true(&degraded.conditions, ConditionType::Ready));

    platform.recover(&key, "flaky-2");
    let phases = platform.converge(&key, 5).await;
    assert_eq!(phases.last(), Some(&ClusterPhase::Stable));
    assert!(!is_condition_true(
        &status(&platform, &key).conditions,
        ConditionType::Degraded
    ));
}

#[tokio::test]
async fn test_not_ready_member_within_grace_is_not_failed() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("patient", 3, None))
        .await;
    platform.converge(&key, 10).await;

    platform.stall(&key, "patient-1");
    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert_ne!(outcome.phase, ClusterPhase::Degraded);
    assert_ne!(outcome.phase, ClusterPhase::Stable);
}

#[tokio::test]
async fn test_transient_faults_are_retried() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("bumpy", 3, None))
        .await;
    platform
        .memory
        .pods
        .fail_next(FaultOp::Create, Fault::Transient, 2);
    platform
        .memory
        .services
        .fail_next(FaultOp::Create, Fault::Transient, 1);

    let first = platform.reconcile(&key).await.expect("reconcile");
    assert!(first.report.failed.is_empty(), "{:?}", first.report.failed);
    assert_eq!(platform.member_ordinals(&key), vec![0, 1, 2]);

    platform.kubelet();
    let phases = platform.converge(&key, 10).await;
    assert_eq!(phases.last(), Some(&ClusterPhase::Stable));
}

#[tokio::test]
async fn test_exhausted_retries_surface_action_failed() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("stuck", 1, None))
        .await;
    platform
        .memory
        .pods
        .fail_next(FaultOp::Create, Fault::Transient, 3);

    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert_eq!(outcome.report.failed.len(), 1);
    assert_eq!(outcome.report.failed[0].action, Action::CreateMemberPod(0));
    let delay = outcome.requeue_after.expect("requeued");
    assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));

    let failed = status(&platform, &key);
    let condition =
        find_condition(&failed.conditions, ConditionType::ActionFailed).expect("condition");
    assert!(condition.is_true());
    assert_eq!(condition.reason, "RetriesExhausted");

    platform.converge(&key, 10).await;
    assert!(!is_condition_true(
        &status(&platform, &key).conditions,
        ConditionType::ActionFailed
    ));
}

#[tokio::test]
async fn test_write_conflicts_are_refetched() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("contended", 1, None))
        .await;
    platform
        .memory
        .clusters
        .fail_next(FaultOp::Replace, Fault::Conflict, 2);
    platform
        .memory
        .clusters
        .fail_next(FaultOp::ReplaceStatus, Fault::Conflict, 2);

    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert!(outcome.report.failed.is_empty());
    let cluster = platform.cluster(&key).expect("cluster");
    assert!(
        cluster
            .metadata
            .finalizers
            .is_some_and(|f| f.contains(&CLUSTER_FINALIZER.to_string()))
    );
    assert!(cluster.status.is_some());
}

#[tokio::test]
async fn test_status_conflicts_exhausted() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("hot", 1, None))
        .await;
    let attempts = platform.ctx.settings.conflict_attempts as usize;
    platform
        .memory
        .clusters
        .fail_next(FaultOp::ReplaceStatus, Fault::Conflict, attempts);

    let err = platform.reconcile(&key).await.expect_err("status write fails");
    assert!(matches!(err, Error::ConflictExhausted { .. }), "{err}");
    let cluster = Arc::new(platform.cluster(&key).expect("cluster exists"));
    assert_ne!(
        error_policy(cluster, &err, platform.ctx.clone()),
        ControllerAction::await_change()
    );

    platform.kubelet();
    let phases = platform.converge(&key, 10).await;
    assert_eq!(phases.last(), Some(&ClusterPhase::Stable));
}

#[tokio::test]
async fn test_invalid_spec_is_reported_not_applied() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("broken", 12, None))
        .await;

    let outcome = platform.reconcile(&key).await.expect("reconcile");
    assert!(outcome.actions.is_empty());
    assert_eq!(outcome.phase, ClusterPhase::Initializing);
    assert_eq!(outcome.requeue_after, Some(SPEC_INVALID_REQUEUE));
    assert!(platform.member_pods(&key).is_empty());

    let invalid = status(&platform, &key);
    let condition =
        find_condition(&invalid.conditions, ConditionType::SpecInvalid).expect("condition");
    assert!(condition.is_true());
    assert_eq!(condition.reason, "ValidationFailed");
    assert!(condition.message.contains("spec.instances"));

    platform.update_spec(&key, |spec| spec.instances = 3).await;
    platform.converge(&key, 10).await;
    assert_eq!(platform.member_ordinals(&key), vec![0, 1, 2]);
    assert!(!is_condition_true(
        &status(&platform, &key).conditions,
        ConditionType::SpecInvalid
    ));
}

#[tokio::test]
async fn test_not_found_stops_requeue() {
    let platform = TestPlatform::new();
    let gone = Arc::new(test_cluster("gone", 1, None));

    let err = reconcile_cluster(gone.clone(), platform.ctx.clone())
        .await
        .expect_err("cluster is not stored");
    assert!(err.is_not_found());
    assert_eq!(
        error_policy(gone, &err, platform.ctx.clone()),
        ControllerAction::await_change()
    );
}

#[tokio::test]
async fn test_controller_action_follows_requeue_delay() {
    let platform = TestPlatform::new();
    let key = platform
        .create_cluster(&test_cluster("paced", 1, None))
        .await;
    let cluster = Arc::new(platform.cluster(&key).expect("cluster exists"));

    let action = reconcile_cluster(cluster, platform.ctx.clone())
        .await
        .expect("reconcile");
    assert_eq!(action, ControllerAction::requeue(CONVERGING_REQUEUE));
}
