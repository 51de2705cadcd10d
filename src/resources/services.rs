//! Service generation for InnoDB clusters.
//!
//! Creates two services:
//! - **Router Service** (`<cluster>`): client entry point through the routers
//! - **Instances Service** (`<cluster>-instances`): headless, gives each
//!   member a stable DNS name for group replication

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::InnoDBCluster;
use crate::resources::common::{
    COMPONENT_MYSQLD, LABEL_CLUSTER, LABEL_COMPONENT, LABEL_TIER, TIER_MYSQL,
    instances_service_name, member_selector, owner_reference, router_selector,
};
use crate::resources::pods::{GR_PORT, MYSQL_PORT, MYSQLX_PORT};
use crate::resources::router::{
    ROUTER_RO_PORT, ROUTER_RW_PORT, ROUTER_X_RO_PORT, ROUTER_X_RW_PORT,
};

/// The services an InnoDBCluster owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    /// Client entry point through the routers
    Router,
    /// Headless service for member DNS
    Instances,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Router, ServiceKind::Instances];

    /// Service name for a cluster.
    pub fn service_name(&self, cluster: &str) -> String {
        match self {
            ServiceKind::Router => cluster.to_string(),
            ServiceKind::Instances => instances_service_name(cluster),
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Router => write!(f, "router"),
            ServiceKind::Instances => write!(f, "instances"),
        }
    }
}

/// Generate the service of the given kind.
pub fn generate_service(cluster: &InnoDBCluster, kind: ServiceKind) -> Service {
    match kind {
        ServiceKind::Router => generate_router_service(cluster),
        ServiceKind::Instances => generate_instances_service(cluster),
    }
}

fn service_labels(cluster: &str) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        (LABEL_TIER.to_string(), TIER_MYSQL.to_string()),
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
    ])
}

fn tcp_port(port: i32, name: &str) -> ServicePort {
    ServicePort {
        port,
        target_port: Some(IntOrString::Int(port)),
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the router Service.
///
/// Load-balances client connections over router pods on the four
/// router ports.
pub fn generate_router_service(cluster: &InnoDBCluster) -> Service {
    let name = cluster.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(ServiceKind::Router.service_name(&name)),
            namespace: cluster.namespace(),
            labels: Some(service_labels(&name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(router_selector(&name)),
            ports: Some(vec![
                tcp_port(ROUTER_RW_PORT, "mysql"),
                tcp_port(ROUTER_RO_PORT, "mysql-ro"),
                tcp_port(ROUTER_X_RW_PORT, "mysqlx"),
                tcp_port(ROUTER_X_RO_PORT, "mysqlx-ro"),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the headless instances Service.
///
/// `publishNotReadyAddresses` lets members resolve each other while the
/// group is still forming.
pub fn generate_instances_service(cluster: &InnoDBCluster) -> Service {
    let name = cluster.name_any();
    let mut labels = service_labels(&name);
    labels.insert(LABEL_COMPONENT.to_string(), COMPONENT_MYSQLD.to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(ServiceKind::Instances.service_name(&name)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(member_selector(&name)),
            ports: Some(vec![
                tcp_port(MYSQL_PORT, "mysql"),
                tcp_port(MYSQLX_PORT, "mysqlx"),
                tcp_port(GR_PORT, "gr-xcom"),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
