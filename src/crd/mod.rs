//! Custom Resource Definitions (CRDs) for mysql-operator.
//!
//! - `InnoDBCluster`: Deploy and manage a MySQL InnoDB Cluster topology

mod innodb_cluster;

pub use innodb_cluster::*;
