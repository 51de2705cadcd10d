// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for mysql-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod crd_tests {
    use mysql_operator::crd::{
        ClusterPhase, ClusterState, Condition, InnoDBClusterSpec, MemberRole, RouterSpec,
    };

    #[test]
    fn test_phase_display() {
        assert_eq!(ClusterPhase::Initializing.to_string(), "Initializing");
        assert_eq!(ClusterPhase::Growing.to_string(), "Growing");
        assert_eq!(ClusterPhase::Shrinking.to_string(), "Shrinking");
        assert_eq!(ClusterPhase::Stable.to_string(), "Stable");
        assert_eq!(ClusterPhase::Degraded.to_string(), "Degraded");
        assert_eq!(ClusterPhase::Deleting.to_string(), "Deleting");
        assert_eq!(ClusterPhase::Deleted.to_string(), "Deleted");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(ClusterPhase::default(), ClusterPhase::Initializing);
    }

    #[test]
    fn test_cluster_state_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&ClusterState::Online).unwrap(),
            "\"ONLINE\""
        );
        assert_eq!(ClusterState::Finalizing.to_string(), "FINALIZING");
    }

    #[test]
    fn test_member_role_label_value() {
        assert_eq!(MemberRole::Primary.label_value(), Some("PRIMARY"));
        assert_eq!(MemberRole::Secondary.label_value(), Some("SECONDARY"));
        assert_eq!(MemberRole::Unknown.label_value(), None);
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "AllMembersOnline", "3/3 members online", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "AllMembersOnline");
        assert_eq!(condition.observed_generation, Some(1));
        assert!(condition.is_true());
    }

    #[test]
    fn test_condition_degraded() {
        let condition = Condition::degraded(false, "MembersHealthy", "No member failing", None);
        assert_eq!(condition.r#type, "Degraded");
        assert!(!condition.is_true());
    }

    #[test]
    fn test_spec_defaults() {
        let spec: InnoDBClusterSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.instances, 1);
        assert_eq!(spec.router_instances(), 0);
        assert_eq!(spec.server_version(), "8.0.36");
    }

    #[test]
    fn test_spec_router_and_image() {
        let spec: InnoDBClusterSpec = serde_json::from_value(serde_json::json!({
            "instances": 3,
            "router": {"instances": 2},
            "image": "registry.local:5000/mysql/mysql-server:8.0.40",
        }))
        .unwrap();
        assert_eq!(spec.router, Some(RouterSpec { instances: 2 }));
        assert_eq!(spec.router_instances(), 2);
        assert_eq!(spec.server_version(), "8.0.40");
    }

    #[test]
    fn test_server_version_without_tag() {
        let spec = InnoDBClusterSpec {
            image: Some("registry.local:5000/mysql".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.server_version(), "latest");
    }
}

mod state_machine_tests {
    use mysql_operator::controller::cluster_state_machine::{
        ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult,
    };
    use mysql_operator::crd::ClusterPhase;

    #[test]
    fn test_valid_events_from_stable() {
        let sm = ClusterStateMachine::new();
        assert!(sm.can_transition(&ClusterPhase::Stable, &ClusterEvent::Grow));
        assert!(sm.can_transition(&ClusterPhase::Stable, &ClusterEvent::Shrink));
        assert!(sm.can_transition(&ClusterPhase::Stable, &ClusterEvent::MemberFailure));
        assert!(sm.can_transition(&ClusterPhase::Stable, &ClusterEvent::DeletionRequested));
        assert!(!sm.can_transition(&ClusterPhase::Stable, &ClusterEvent::MembersDrained));
    }

    #[test]
    fn test_deleted_is_terminal() {
        let sm = ClusterStateMachine::new();
        assert!(sm.valid_events(&ClusterPhase::Deleted).is_empty());
    }

    #[test]
    fn test_deleting_never_returns_to_live_phase() {
        let sm = ClusterStateMachine::new();
        for event in [
            ClusterEvent::Grow,
            ClusterEvent::Shrink,
            ClusterEvent::Converged,
            ClusterEvent::MemberFailure,
        ] {
            assert!(
                !sm.can_transition(&ClusterPhase::Deleting, &event),
                "Deleting accepted {event}"
            );
        }
    }

    #[test]
    fn test_converged_requires_ready_members() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(3, 2);
        let result = sm.transition(&ClusterPhase::Growing, ClusterEvent::Converged, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
        assert_eq!(result.next_phase(ClusterPhase::Growing), ClusterPhase::Growing);

        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(&ClusterPhase::Growing, ClusterEvent::Converged, &ctx);
        assert_eq!(result.next_phase(ClusterPhase::Growing), ClusterPhase::Stable);
    }

    #[test]
    fn test_drained_reaches_deleted() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(0, 0).with_drained(true);
        let result = sm.transition(&ClusterPhase::Deleting, ClusterEvent::MembersDrained, &ctx);
        assert_eq!(result.next_phase(ClusterPhase::Deleting), ClusterPhase::Deleted);
    }
}

mod resource_tests {
    use kube::ResourceExt;
    use mysql_operator::resources::common::{
        LABEL_CLUSTER, LABEL_CLUSTER_ROLE, MEMBERSHIP_FINALIZER, member_pod_name, parse_ordinal,
        router_name,
    };
    use mysql_operator::resources::pods::generate_member_pod;
    use mysql_operator::resources::router::{generate_router_replica_set, with_replicas};
    use mysql_operator::resources::services::{ServiceKind, generate_service};

    use crate::common::InnoDBClusterBuilder;

    #[test]
    fn test_member_pod_identity() {
        let cluster = InnoDBClusterBuilder::new("mycluster")
            .instances(3)
            .uid("abc-123")
            .build();
        let pod = generate_member_pod(&cluster, 2);

        assert_eq!(pod.name_any(), "mycluster-2");
        assert_eq!(parse_ordinal("mycluster", &pod.name_any()), Some(2));
        assert_eq!(pod.labels()[LABEL_CLUSTER], "mycluster");
        assert!(!pod.labels().contains_key(LABEL_CLUSTER_ROLE));
        assert_eq!(pod.finalizers(), [MEMBERSHIP_FINALIZER.to_string()]);

        let owner = &pod.owner_references()[0];
        assert_eq!(owner.kind, "InnoDBCluster");
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_member_pod_uses_spec_image() {
        let cluster = InnoDBClusterBuilder::new("ic")
            .image("mysql/mysql-server:8.0.40")
            .build();
        let pod = generate_member_pod(&cluster, 0);
        let spec = pod.spec.expect("pod spec");
        assert!(
            spec.containers
                .iter()
                .any(|c| c.image.as_deref() == Some("mysql/mysql-server:8.0.40"))
        );
        assert_eq!(spec.subdomain.as_deref(), Some("ic-instances"));
    }

    #[test]
    fn test_router_replica_set() {
        let cluster = InnoDBClusterBuilder::new("ic").routers(2).build();
        let rs = generate_router_replica_set(&cluster, 2);
        assert_eq!(rs.name_any(), router_name("ic"));
        assert_eq!(rs.spec.as_ref().and_then(|s| s.replicas), Some(2));

        let scaled = with_replicas(&rs, 4);
        assert_eq!(scaled.spec.as_ref().and_then(|s| s.replicas), Some(4));
        assert_eq!(scaled.labels(), rs.labels());
    }

    #[test]
    fn test_service_names() {
        let cluster = InnoDBClusterBuilder::new("ic").build();
        assert_eq!(
            generate_service(&cluster, ServiceKind::Router).name_any(),
            "ic"
        );
        let headless = generate_service(&cluster, ServiceKind::Instances);
        assert_eq!(headless.name_any(), "ic-instances");
        assert_eq!(
            headless.spec.and_then(|s| s.cluster_ip).as_deref(),
            Some("None")
        );
    }

    #[test]
    fn test_member_pod_name() {
        assert_eq!(member_pod_name("ic", 0), "ic-0");
        assert_eq!(parse_ordinal("ic", "ic-router"), None);
        assert_eq!(parse_ordinal("ic", "ic-"), None);
    }
}

mod status_tests {
    use std::collections::{BTreeMap, BTreeSet};

    use mysql_operator::controller::executor::ExecutionReport;
    use mysql_operator::controller::observed::{ObservedCluster, ObservedMember};
    use mysql_operator::controller::status::{
        ConditionBuilder, StatusInput, cluster_state, compute_status, find_condition,
    };
    use mysql_operator::crd::{
        ClusterPhase, ClusterState, Condition, ConditionType, InnoDBCluster, InnoDBClusterSpec,
        MemberRole,
    };

    #[test]
    fn test_cluster_state_mapping() {
        assert_eq!(
            cluster_state(ClusterPhase::Initializing, 0),
            ClusterState::Initializing
        );
        assert_eq!(cluster_state(ClusterPhase::Stable, 3), ClusterState::Online);
        assert_eq!(cluster_state(ClusterPhase::Growing, 0), ClusterState::Offline);
        assert_eq!(
            cluster_state(ClusterPhase::Degraded, 2),
            ClusterState::Degraded
        );
        assert_eq!(
            cluster_state(ClusterPhase::Deleting, 3),
            ClusterState::Finalizing
        );
    }

    #[test]
    fn test_builder_keeps_unchanged_transition_time() {
        let mut previous = Condition::ready(false, "Growing", "0/3 members online", Some(1));
        previous.last_transition_time = "2024-01-01T00:00:00Z".to_string();

        let mut builder = ConditionBuilder::new(std::slice::from_ref(&previous));
        builder.condition(
            ConditionType::Ready,
            false,
            "Growing",
            "2/3 members online",
            Some(2),
        );
        let conditions = builder.build();
        let ready = find_condition(&conditions, ConditionType::Ready).expect("ready");
        assert_eq!(ready.last_transition_time, "2024-01-01T00:00:00Z");
        assert_eq!(ready.message, "2/3 members online");
    }

    #[test]
    fn test_online_instances_exclude_surplus_members() {
        let cluster = InnoDBCluster::new(
            "ic",
            InnoDBClusterSpec {
                instances: 1,
                ..Default::default()
            },
        );
        // Ordinal 0 is down; the surplus 1 and 2 are up but awaiting removal.
        let members = (0..3)
            .map(|ordinal| {
                let member = ObservedMember {
                    ordinal,
                    name: format!("ic-{ordinal}"),
                    labels: BTreeMap::new(),
                    has_membership_finalizer: true,
                    deleting: false,
                    ready: ordinal != 0,
                    not_ready_since: None,
                    role: MemberRole::Secondary,
                    in_group: true,
                };
                (ordinal, member)
            })
            .collect();
        let observed = ObservedCluster {
            cluster,
            members,
            router: None,
            services: BTreeSet::new(),
        };
        assert_eq!(observed.online_count(1), 0);
        assert_eq!(observed.online_count(3), 2);

        let report = ExecutionReport::default();
        let status = compute_status(
            &observed,
            StatusInput {
                phase: ClusterPhase::Shrinking,
                spec_error: None,
                report: &report,
            },
        );
        assert_eq!(status.online_instances(), 0);
    }
}

mod summary_tests {
    use mysql_operator::crd::{
        ClusterPhase, ClusterState, ClusterStatusSummary, InnoDBClusterStatus,
    };
    use mysql_operator::summary::{format_age, render, summarize};

    use crate::common::test_cluster;

    #[test]
    fn test_summarize_cluster() {
        let mut cluster = test_cluster("mycluster", 3, Some(2));
        let created = jiff::Timestamp::from_second(1_700_000_000).unwrap();
        cluster.metadata.creation_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(created));
        cluster.status = Some(InnoDBClusterStatus {
            cluster: Some(ClusterStatusSummary {
                status: ClusterState::Online,
                online_instances: 3,
            }),
            phase: ClusterPhase::Stable,
            ..Default::default()
        });

        let now = jiff::Timestamp::from_second(1_700_000_000 + 7200).unwrap();
        let row = summarize(&cluster, now);
        assert_eq!(row.name, "mycluster");
        assert_eq!(row.status, "ONLINE");
        assert_eq!(row.online, "3");
        assert_eq!(row.instances, "3");
        assert_eq!(row.routers, "2");
        assert_eq!(row.age, "2h");

        let table = render(&[row]);
        assert!(table.contains("NAME"));
        assert!(table.contains("mycluster"));
        assert!(table.contains("ONLINE"));
    }

    #[test]
    fn test_summarize_without_status() {
        let cluster = test_cluster("fresh", 1, None);
        let row = summarize(&cluster, jiff::Timestamp::now());
        assert_eq!(row.status, "");
        assert_eq!(row.routers, "");
        assert_eq!(row.age, "");
    }

    #[test]
    fn test_format_age_boundaries() {
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(60), "1m");
        assert_eq!(format_age(86_399), "23h");
        assert_eq!(format_age(86_400), "1d");
    }
}

mod error_tests {
    use std::time::Duration;

    use mysql_operator::controller::error::Error;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transient("timeout".to_string()).is_retryable());
        assert!(
            Error::Conflict {
                kind: "Pod".to_string(),
                name: "ic-0".to_string()
            }
            .is_retryable()
        );
        assert!(!Error::QuorumRisk("1 of 2 online".to_string()).is_retryable());
        assert!(!Error::SpecInvalid("bad".to_string()).is_retryable());
        assert!(!Error::not_found("Pod", "ic-0").is_retryable());
    }

    #[test]
    fn test_requeue_after() {
        assert_eq!(
            Error::QuorumRisk(String::new()).requeue_after(),
            Duration::from_secs(15)
        );
        assert_eq!(
            Error::SpecInvalid(String::new()).requeue_after(),
            Duration::from_secs(300)
        );
        assert_eq!(
            Error::Transient(String::new()).requeue_after(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_not_found_predicate() {
        assert!(Error::not_found("InnoDBCluster", "ic").is_not_found());
        assert!(!Error::Transient(String::new()).is_not_found());
    }
}

mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use mysql_operator::config::{DEFAULT_HEALTH_PORT, OperatorConfig};

    fn load(vars: &[(&str, &str)]) -> mysql_operator::controller::error::Result<OperatorConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("POD_NAME", "op-0")]).unwrap();
        assert_eq!(config.pod_name, "op-0");
        assert_eq!(config.pod_namespace, "default");
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.health_port, DEFAULT_HEALTH_PORT);
        assert_eq!(config.member_failure_grace, Duration::from_secs(30));
    }

    #[test]
    fn test_settings_follow_config() {
        let config = load(&[
            ("POD_NAME", "op-0"),
            ("ACTION_MAX_ATTEMPTS", "7"),
            ("CONFLICT_MAX_ATTEMPTS", "3"),
            ("MEMBER_FAILURE_GRACE_SECS", "90"),
        ])
        .unwrap();
        let settings = config.settings();
        assert_eq!(settings.retry.max_attempts, 7);
        assert_eq!(settings.conflict_attempts, 3);
        assert_eq!(settings.member_failure_grace, Duration::from_secs(90));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(load(&[("MAX_CONCURRENT_RECONCILES", "0")]).is_err());
        assert!(load(&[("HEALTH_PORT", "not-a-port")]).is_err());
    }
}
