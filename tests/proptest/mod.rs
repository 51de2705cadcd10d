// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for mysql-operator.
//!
//! Uses proptest to generate random observed topologies and verify the
//! ordering and safety rules of the diff engine and the phase machine.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use mysql_operator::controller::cluster_state_machine::{
    ClusterEvent, ClusterStateMachine, TransitionContext, determine_event,
};
use mysql_operator::controller::diff::{Action, DesiredState, diff, members_stable};
use mysql_operator::controller::observed::{ObservedCluster, ObservedMember, ObservedRouter};
use mysql_operator::crd::{
    ClusterPhase, InnoDBCluster, InnoDBClusterSpec, MAX_INSTANCES, MemberRole, RouterSpec,
};
use mysql_operator::group::quorum::{check_removal, has_majority};
use mysql_operator::resources::common::{CLUSTER_FINALIZER, member_labels};
use mysql_operator::resources::services::ServiceKind;

/// Strategy for generating valid instance counts (1-9).
fn valid_instances() -> impl Strategy<Value = i32> {
    1..=MAX_INSTANCES
}

/// Strategy for generating random phases.
fn any_phase() -> impl Strategy<Value = ClusterPhase> {
    prop_oneof![
        Just(ClusterPhase::Initializing),
        Just(ClusterPhase::Growing),
        Just(ClusterPhase::Shrinking),
        Just(ClusterPhase::Stable),
        Just(ClusterPhase::Degraded),
        Just(ClusterPhase::Deleting),
        Just(ClusterPhase::Deleted),
    ]
}

fn any_event() -> impl Strategy<Value = ClusterEvent> {
    prop_oneof![
        Just(ClusterEvent::Grow),
        Just(ClusterEvent::Shrink),
        Just(ClusterEvent::Converged),
        Just(ClusterEvent::MemberFailure),
        Just(ClusterEvent::DeletionRequested),
        Just(ClusterEvent::MembersDrained),
    ]
}

fn any_role() -> impl Strategy<Value = MemberRole> {
    prop_oneof![
        Just(MemberRole::Primary),
        Just(MemberRole::Secondary),
        Just(MemberRole::Unknown),
    ]
}

/// (ready, deleting, in_group, has_finalizer, role, labelled)
type MemberFlags = (bool, bool, bool, bool, MemberRole, bool);

fn member_flags() -> impl Strategy<Value = MemberFlags> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any_role(),
        any::<bool>(),
    )
}

/// Strategy for an observed topology: members at arbitrary ordinals below
/// the maximum, an optional router and a subset of services.
fn observed_cluster() -> impl Strategy<Value = ObservedCluster> {
    (
        valid_instances(),
        0..=3i32,
        prop::collection::btree_map(0..MAX_INSTANCES, member_flags(), 0..=9),
        prop::option::of((0..=3i32, any::<bool>())),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(instances, routers, members, router, finalized, services)| {
            let mut cluster = InnoDBCluster::new(
                "ic",
                InnoDBClusterSpec {
                    instances,
                    router: Some(RouterSpec { instances: routers }),
                    ..Default::default()
                },
            );
            cluster.metadata.namespace = Some("default".to_string());
            if finalized {
                cluster.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
            }
            let members = members
                .into_iter()
                .map(
                    |(ordinal, (ready, deleting, in_group, finalizer, role, labelled))| {
                        let member = ObservedMember {
                            ordinal,
                            name: format!("ic-{ordinal}"),
                            labels: if labelled {
                                member_labels("ic", role)
                            } else {
                                BTreeMap::new()
                            },
                            has_membership_finalizer: finalizer,
                            deleting,
                            ready,
                            not_ready_since: None,
                            role,
                            in_group: in_group && !deleting,
                        };
                        (ordinal, member)
                    },
                )
                .collect();
            ObservedCluster {
                cluster,
                members,
                router: router.map(|(replicas, deleting)| ObservedRouter {
                    replicas,
                    ready_replicas: replicas,
                    deleting,
                }),
                services: if services {
                    ServiceKind::ALL.into_iter().collect()
                } else {
                    BTreeSet::new()
                },
            }
        })
}

fn plan(observed: &ObservedCluster) -> (DesiredState, Vec<Action>) {
    let desired = DesiredState::from_cluster(&observed.cluster).expect("valid spec");
    let actions = diff(&desired, observed);
    (desired, actions)
}

proptest! {
    /// The same inputs always produce the same plan.
    #[test]
    fn diff_is_deterministic(observed in observed_cluster()) {
        let (_, first) = plan(&observed);
        let (_, second) = plan(&observed);
        prop_assert_eq!(first, second);
    }

    /// Stages never go backwards within a plan.
    #[test]
    fn diff_stages_are_ordered(observed in observed_cluster()) {
        let (_, actions) = plan(&observed);
        for pair in actions.windows(2) {
            prop_assert!(
                pair[0].stage() <= pair[1].stage(),
                "{} before {}", pair[0], pair[1]
            );
        }
    }

    /// Members are created by ascending and removed by descending ordinal.
    #[test]
    fn diff_member_ordinals_are_ordered(observed in observed_cluster()) {
        let (desired, actions) = plan(&observed);
        let created: Vec<i32> = actions.iter().filter_map(|a| match a {
            Action::CreateMemberPod(o) => Some(*o),
            _ => None,
        }).collect();
        let removed: Vec<i32> = actions.iter().filter_map(|a| match a {
            Action::DeleteMemberPod(o) => Some(*o),
            _ => None,
        }).collect();

        prop_assert!(created.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(removed.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(created.iter().all(|o| *o < desired.instances));
        prop_assert!(removed.iter().all(|o| *o >= desired.instances));
        prop_assert!(created.iter().all(|o| !observed.members.contains_key(o)));
    }

    /// Deleting members are never touched again except to release them.
    #[test]
    fn diff_leaves_deleting_members_alone(observed in observed_cluster()) {
        let (_, actions) = plan(&observed);
        for action in &actions {
            let ordinal = match action {
                Action::DeleteMemberPod(o) | Action::UpdateLabels(o, _) => *o,
                _ => continue,
            };
            prop_assert!(!observed.members[&ordinal].deleting, "{}", action);
        }
    }

    /// Router actions wait until member topology is stable.
    #[test]
    fn diff_router_gated_on_stable_members(observed in observed_cluster()) {
        let (desired, actions) = plan(&observed);
        let router_actions = actions.iter().any(|a| matches!(
            a,
            Action::CreateRouterDeployment(_)
                | Action::ScaleRouterDeployment(_)
                | Action::DeleteRouterDeployment
        ));
        if router_actions {
            prop_assert!(members_stable(desired.instances, &observed));
        }
    }

    /// Once deletion starts the cluster never returns to a live phase.
    #[test]
    fn deleting_only_moves_forward(event in any_event(), drained in any::<bool>()) {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(0, 0).with_drained(drained);
        let next = sm
            .transition(&ClusterPhase::Deleting, event, &ctx)
            .next_phase(ClusterPhase::Deleting);
        prop_assert!(matches!(next, ClusterPhase::Deleting | ClusterPhase::Deleted));
    }

    /// Deleted is reached only through a drain.
    #[test]
    fn deleted_requires_drain(
        phase in any_phase(),
        event in any_event(),
        desired in 0..=9i32,
        ready in 0..=9i32,
    ) {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(desired, ready);
        let next = sm.transition(&phase, event, &ctx).next_phase(phase);
        if phase != ClusterPhase::Deleted {
            prop_assert_ne!(next, ClusterPhase::Deleted);
        }
    }

    /// Deletion dominates every other signal.
    #[test]
    fn deletion_event_has_priority(
        desired in 0..=9i32,
        ready in 0..=9i32,
        failed in 0..=3i32,
        actions in 0..=5usize,
        drained in any::<bool>(),
    ) {
        let ctx = TransitionContext::new(desired, ready)
            .with_failed(failed)
            .with_actions(actions, 0)
            .with_drained(drained);
        let event = determine_event(&ctx, true);
        let expected = if drained {
            ClusterEvent::MembersDrained
        } else {
            ClusterEvent::DeletionRequested
        };
        prop_assert_eq!(event, expected);
    }

    /// Failures outrank scaling; removals outrank growth.
    #[test]
    fn live_event_priority(
        desired in 1..=9i32,
        ready in 0..=9i32,
        failed in 0..=3i32,
        actions in 0..=5usize,
        removals in 0..=2usize,
    ) {
        let actions = actions + removals;
        let ctx = TransitionContext::new(desired, ready)
            .with_failed(failed)
            .with_actions(actions, removals);
        let event = determine_event(&ctx, false);
        if failed > 0 {
            prop_assert_eq!(event, ClusterEvent::MemberFailure);
        } else if removals > 0 {
            prop_assert_eq!(event, ClusterEvent::Shrink);
        } else if actions > 0 || ready < desired {
            prop_assert_eq!(event, ClusterEvent::Grow);
        } else {
            prop_assert_eq!(event, ClusterEvent::Converged);
        }
    }

    /// Removal is allowed exactly when the survivors keep a strict majority.
    #[test]
    fn removal_preserves_majority(
        online in prop::collection::vec(any::<bool>(), 1..=9),
        target in 0..9usize,
    ) {
        let members: Vec<(String, bool)> = online
            .iter()
            .enumerate()
            .map(|(i, up)| (format!("ic-{i}"), *up))
            .collect();
        let target = format!("ic-{}", target % members.len());
        let survivors: Vec<bool> = members
            .iter()
            .filter(|(name, _)| *name != target)
            .map(|(_, up)| *up)
            .collect();
        let up = survivors.iter().filter(|u| **u).count();
        prop_assert_eq!(
            check_removal(&members, &target).is_ok(),
            has_majority(up, survivors.len())
        );
    }
}
