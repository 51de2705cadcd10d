//! Member pod generation for InnoDB clusters.
//!
//! Members are managed as individual pods rather than through a StatefulSet
//! so the reconciler controls exactly which ordinal is created or removed,
//! and can hold each pod with the membership finalizer until the group has
//! evicted it.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, ObjectFieldSelector, Pod, PodSpec,
    Probe,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{InnoDBCluster, MemberRole};
use crate::resources::common::{
    MEMBERSHIP_FINALIZER, image_pull_secrets, instances_service_name, member_labels,
    member_pod_name, owner_reference,
};

/// Classic protocol port
pub const MYSQL_PORT: i32 = 3306;
/// X protocol port
pub const MYSQLX_PORT: i32 = 33060;
/// Group replication port
pub const GR_PORT: i32 = 33061;
/// Termination grace period in seconds
const TERMINATION_GRACE_PERIOD: i64 = 30;

/// Generate the member pod for `ordinal`.
///
/// The pod starts with the three static labels and the membership
/// finalizer. The role label is added once the group reports a role.
pub fn generate_member_pod(cluster: &InnoDBCluster, ordinal: i32) -> Pod {
    let cluster_name = cluster.name_any();
    let name = member_pod_name(&cluster_name, ordinal);

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(member_labels(&cluster_name, MemberRole::Unknown)),
            finalizers: Some(vec![MEMBERSHIP_FINALIZER.to_string()]),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name),
            subdomain: Some(instances_service_name(&cluster_name)),
            restart_policy: Some("Always".to_string()),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            init_containers: Some(vec![generate_initconf_container(cluster)]),
            containers: vec![generate_mysql_container(cluster)],
            tolerations: cluster.spec.tolerations.clone().filter(|t| !t.is_empty()),
            image_pull_secrets: image_pull_secrets(cluster),
            ..Default::default()
        }),
        status: None,
    }
}

/// Init container that renders the server configuration for this member.
fn generate_initconf_container(cluster: &InnoDBCluster) -> Container {
    Container {
        name: "initconf".to_string(),
        image: Some(cluster.spec.server_image()),
        image_pull_policy: cluster.spec.image_pull_policy.clone(),
        command: Some(vec![
            "mysqlsh".to_string(),
            "--pym".to_string(),
            "mysqloperator".to_string(),
            "init".to_string(),
        ]),
        env: Some(generate_env_vars(cluster)),
        ..Default::default()
    }
}

/// Generate the main server container.
fn generate_mysql_container(cluster: &InnoDBCluster) -> Container {
    Container {
        name: "mysql".to_string(),
        image: Some(cluster.spec.server_image()),
        image_pull_policy: cluster.spec.image_pull_policy.clone(),
        ports: Some(vec![
            container_port(MYSQL_PORT, "mysql"),
            container_port(MYSQLX_PORT, "mysqlx"),
            container_port(GR_PORT, "gr-xcom"),
        ]),
        env: Some(generate_env_vars(cluster)),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec!["/readinessprobe.sh".to_string()]),
            }),
            period_seconds: Some(5),
            failure_threshold: Some(10000),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_port(port: i32, name: &str) -> ContainerPort {
    ContainerPort {
        container_port: port,
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn generate_env_vars(cluster: &InnoDBCluster) -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: "POD_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: "MYSQL_CLUSTER_NAME".to_string(),
            value: Some(cluster.name_any()),
            ..Default::default()
        },
    ]
}
