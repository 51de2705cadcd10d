//! mysql-operator library crate
//!
//! This module exports the reconciliation engine, CRD definitions, resource
//! generators and the object stores it runs against.

pub mod config;
pub mod controller;
pub mod crd;
pub mod group;
pub mod health;
pub mod resources;
pub mod store;
pub mod summary;

pub use health::HealthState;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, WatchStreamExt, reflector};
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controller::cluster_reconciler::{error_policy, reconcile_cluster};
use controller::context::Context;
use crd::InnoDBCluster;
use resources::common::LABEL_CLUSTER;

/// Cluster an owned object belongs to, from its cluster label.
pub fn owner_ref<K: Resource>(obj: &K) -> Option<ObjectRef<InnoDBCluster>> {
    let cluster = obj.labels().get(LABEL_CLUSTER)?;
    Some(ObjectRef::new(cluster).within(&obj.namespace()?))
}

/// Run the operator until `shutdown` is cancelled.
///
/// When `namespace` is `Some(ns)`, only clusters in that namespace are
/// reconciled. Member pods and router replica sets map back to their
/// cluster through the cluster label, so any change to them triggers a
/// cycle for the owner.
pub async fn run_operator(
    ctx: Arc<Context>,
    namespace: Option<String>,
    max_concurrent: usize,
    shutdown: CancellationToken,
) {
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    info!(scope = %scope_msg, max_concurrent, "Starting InnoDBCluster controller");

    if let Some(state) = &ctx.health_state {
        state.set_ready(true);
    }

    let stores = ctx.stores.clone();
    let scope = namespace.as_deref();
    let (reader, writer) = reflector::store();
    let clusters = reflector(writer, stores.clusters.watch(scope)).applied_objects();
    let config = ControllerConfig::default()
        .concurrency(u16::try_from(max_concurrent).unwrap_or(u16::MAX));

    Controller::for_stream(clusters, reader)
        .with_config(config)
        .watches_stream(stores.pods.watch(scope).touched_objects(), |pod| {
            owner_ref(&pod)
        })
        .watches_stream(stores.replica_sets.watch(scope).touched_objects(), |rs| {
            owner_ref(&rs)
        })
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile_cluster, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(cluster = %obj, ?action, "Reconciled");
                }
                Err(e) => {
                    // Watch events for members of a deleted cluster still
                    // trigger lookups of the cluster.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!(error = ?e, "Cluster no longer exists");
                    } else {
                        error!(error = ?e, "Reconciliation error");
                    }
                }
            }
        })
        .await;

    if let Some(state) = &ctx.health_state {
        state.set_ready(false);
    }
    info!("InnoDBCluster controller stopped");
}
