//! Router replica set generation.
//!
//! Routers are stateless and interchangeable, so a ReplicaSet is enough.
//! It exists only while `spec.router.instances > 0`.

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::crd::{DEFAULT_ROUTER_IMAGE, InnoDBCluster};
use crate::resources::common::{
    image_pull_secrets, instances_service_name, owner_reference, router_labels, router_name,
    router_selector,
};

/// Read-write classic port
pub const ROUTER_RW_PORT: i32 = 6446;
/// Read-only classic port
pub const ROUTER_RO_PORT: i32 = 6447;
/// Read-write X protocol port
pub const ROUTER_X_RW_PORT: i32 = 6448;
/// Read-only X protocol port
pub const ROUTER_X_RO_PORT: i32 = 6449;

/// Generate the router ReplicaSet with `replicas` pods.
pub fn generate_router_replica_set(cluster: &InnoDBCluster, replicas: i32) -> ReplicaSet {
    let cluster_name = cluster.name_any();
    let labels = router_labels(&cluster_name);

    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(router_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(router_selector(&cluster_name)),
                ..Default::default()
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![generate_router_container(cluster)],
                    image_pull_secrets: image_pull_secrets(cluster),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Router image matching the server version.
fn router_image(cluster: &InnoDBCluster) -> String {
    format!("{}:{}", DEFAULT_ROUTER_IMAGE, cluster.spec.server_version())
}

fn generate_router_container(cluster: &InnoDBCluster) -> Container {
    let cluster_name = cluster.name_any();
    let ports = [
        (ROUTER_RW_PORT, "mysql-rw"),
        (ROUTER_RO_PORT, "mysql-ro"),
        (ROUTER_X_RW_PORT, "mysqlx-rw"),
        (ROUTER_X_RO_PORT, "mysqlx-ro"),
    ];

    Container {
        name: "router".to_string(),
        image: Some(router_image(cluster)),
        image_pull_policy: cluster.spec.image_pull_policy.clone(),
        ports: Some(
            ports
                .iter()
                .map(|(port, name)| ContainerPort {
                    container_port: *port,
                    name: Some(name.to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(vec![
            EnvVar {
                name: "MYSQL_HOST".to_string(),
                value: Some(format!(
                    "{}.{}",
                    instances_service_name(&cluster_name),
                    cluster.namespace().unwrap_or_default()
                )),
                ..Default::default()
            },
            EnvVar {
                name: "MYSQL_PORT".to_string(),
                value: Some("3306".to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Copy of `existing` with its replica count set to `replicas`.
pub fn with_replicas(existing: &ReplicaSet, replicas: i32) -> ReplicaSet {
    let mut updated = existing.clone();
    if let Some(spec) = updated.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
    updated
}
