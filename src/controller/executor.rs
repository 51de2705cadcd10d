//! Action executor.
//!
//! Applies the diff engine's actions to the object store. Each action is
//! idempotent: creating an existing object, or deleting, relabelling or
//! releasing an absent one, succeeds without effect. Writes are
//! read-modify-write guarded by the resource version and re-fetched on
//! conflict.
//!
//! Actions run stage by stage in the order given. `Prepare` and `Members`
//! actions run concurrently across objects, while actions on the same
//! object run in order so they never race on its resource version.
//! `Removal`, `Router`
//! and `Teardown` run one at a time and stop at the first failure. `Router`
//! and `Teardown` only run when nothing failed before them.

use std::collections::BTreeMap;

use futures::future::join_all;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::common::{add_finalizer, is_terminating, remove_finalizer};
use crate::controller::diff::{Action, ActionTarget, FinalizerTarget};
use crate::controller::error::{Error, Result};
use crate::controller::retry::retry_with_backoff;
use crate::crd::InnoDBCluster;
use crate::group::Eviction;
use crate::resources::common::{member_pod_name, router_name};
use crate::resources::pods::generate_member_pod;
use crate::resources::router::{generate_router_replica_set, with_replicas};
use crate::resources::services::generate_service;
use crate::store::{SharedStore, StoredObject};

/// What applying an action did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The store was written
    Applied,
    /// Already in the desired state
    Unchanged,
    /// Waiting on the database group, try again next cycle
    Deferred,
}

/// An action that failed after its retries.
#[derive(Clone, Debug)]
pub struct ActionFailure {
    pub action: Action,
    pub error: String,
    /// Failure was a refusal to break group quorum
    pub quorum_risk: bool,
}

/// Result of executing a batch of actions.
#[derive(Clone, Debug, Default)]
pub struct ExecutionReport {
    pub applied: Vec<Action>,
    pub unchanged: Vec<Action>,
    pub deferred: Vec<Action>,
    pub failed: Vec<ActionFailure>,
    /// Not attempted because an earlier action failed
    pub skipped: Vec<Action>,
}

impl ExecutionReport {
    pub fn quorum_blocked(&self) -> bool {
        self.failed.iter().any(|f| f.quorum_risk)
    }

    /// Whether any action wrote to the store.
    pub fn made_progress(&self) -> bool {
        !self.applied.is_empty()
    }

    fn record(&mut self, action: &Action, result: Result<Outcome>) -> bool {
        match result {
            Ok(Outcome::Applied) => self.applied.push(action.clone()),
            Ok(Outcome::Unchanged) => self.unchanged.push(action.clone()),
            Ok(Outcome::Deferred) => self.deferred.push(action.clone()),
            Err(e) => {
                self.failed.push(ActionFailure {
                    action: action.clone(),
                    quorum_risk: matches!(e, Error::QuorumRisk(_)),
                    error: e.to_string(),
                });
                return false;
            }
        }
        true
    }
}

/// Apply `actions` for `cluster`, stage by stage.
pub async fn execute(
    ctx: &Context,
    cluster: &InnoDBCluster,
    actions: &[Action],
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let mut halted = false;

    for run in actions.chunk_by(|a, b| a.stage() == b.stage()) {
        let Some(stage) = run.first().map(Action::stage) else {
            continue;
        };
        if halted || (stage.is_barrier() && !report.failed.is_empty()) {
            debug!(?stage, count = run.len(), "Skipping stage after earlier failure");
            report.skipped.extend(run.iter().cloned());
            continue;
        }

        if stage.is_concurrent() {
            let mut by_target: BTreeMap<ActionTarget, Vec<(usize, &Action)>> = BTreeMap::new();
            for (i, action) in run.iter().enumerate() {
                by_target.entry(action.target()).or_default().push((i, action));
            }
            let groups = join_all(by_target.into_values().map(|group| async move {
                let mut results = Vec::with_capacity(group.len());
                for (i, action) in group {
                    results.push((i, action, apply_with_retry(ctx, cluster, action).await));
                }
                results
            }))
            .await;
            let mut results: Vec<_> = groups.into_iter().flatten().collect();
            // Report in plan order.
            results.sort_by_key(|(i, _, _)| *i);
            for (_, action, result) in results {
                report.record(action, result);
            }
        } else {
            for (i, action) in run.iter().enumerate() {
                let result = apply_with_retry(ctx, cluster, action).await;
                if !report.record(action, result) {
                    report.skipped.extend(run.iter().skip(i + 1).cloned());
                    halted = true;
                    break;
                }
            }
        }
    }

    if let Some(state) = &ctx.health_state {
        for action in &report.applied {
            state.metrics.record_action(action.kind(), true);
        }
        for failure in &report.failed {
            state.metrics.record_action(failure.action.kind(), false);
        }
    }
    report
}

async fn apply_with_retry(
    ctx: &Context,
    cluster: &InnoDBCluster,
    action: &Action,
) -> Result<Outcome> {
    let operation = action.to_string();
    let result =
        retry_with_backoff(&ctx.settings.retry, &operation, || apply(ctx, cluster, action)).await;
    let name = cluster.name_any();
    match &result {
        Ok(Outcome::Applied) => info!(cluster = %name, action = %action, "Applied action"),
        Ok(outcome) => debug!(cluster = %name, action = %action, ?outcome, "No write needed"),
        Err(e) => warn!(cluster = %name, action = %action, error = %e, "Action failed"),
    }
    result
}

fn changed(written: bool) -> Outcome {
    if written {
        Outcome::Applied
    } else {
        Outcome::Unchanged
    }
}

/// Apply a single action once.
pub async fn apply(ctx: &Context, cluster: &InnoDBCluster, action: &Action) -> Result<Outcome> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let stores = &ctx.stores;
    let attempts = ctx.settings.conflict_attempts;

    match action {
        Action::AddFinalizer(FinalizerTarget::Cluster, key) => {
            modify(&stores.clusters, &ns, &name, attempts, |c| {
                !is_terminating(&c.metadata) && add_finalizer(&mut c.metadata, key)
            })
            .await
            .map(changed)
        }
        Action::RemoveFinalizer(FinalizerTarget::Cluster, key) => {
            modify(&stores.clusters, &ns, &name, attempts, |c| {
                remove_finalizer(&mut c.metadata, key)
            })
            .await
            .map(changed)
        }
        Action::AddFinalizer(FinalizerTarget::Member(ordinal), key) => {
            let pod = member_pod_name(&name, *ordinal);
            modify(&stores.pods, &ns, &pod, attempts, |p| {
                !is_terminating(&p.metadata) && add_finalizer(&mut p.metadata, key)
            })
            .await
            .map(changed)
        }
        Action::RemoveFinalizer(FinalizerTarget::Member(ordinal), key) => {
            let pod = member_pod_name(&name, *ordinal);
            // The finalizer holds the member until the group can spare it.
            if ctx.group.evict_member(cluster, &pod).await? == Eviction::InProgress {
                debug!(pod = %pod, "Eviction in progress, keeping membership finalizer");
                return Ok(Outcome::Deferred);
            }
            modify(&stores.pods, &ns, &pod, attempts, |p| {
                remove_finalizer(&mut p.metadata, key)
            })
            .await
            .map(changed)
        }
        Action::UpdateLabels(ordinal, labels) => {
            let pod = member_pod_name(&name, *ordinal);
            modify(&stores.pods, &ns, &pod, attempts, |p| {
                if p.metadata.labels.as_ref() == Some(labels) {
                    return false;
                }
                p.metadata.labels = Some(labels.clone());
                true
            })
            .await
            .map(changed)
        }
        Action::CreateMemberPod(ordinal) => {
            create(&stores.pods, &generate_member_pod(cluster, *ordinal)).await
        }
        Action::DeleteMemberPod(ordinal) => {
            let pod = member_pod_name(&name, *ordinal);
            match ctx.group.evict_member(cluster, &pod).await? {
                Eviction::InProgress => {
                    debug!(pod = %pod, "Eviction in progress, deferring pod deletion");
                    Ok(Outcome::Deferred)
                }
                Eviction::Evicted => delete(&stores.pods, &ns, &pod).await,
            }
        }
        Action::CreateRouterDeployment(replicas) => {
            create(
                &stores.replica_sets,
                &generate_router_replica_set(cluster, *replicas),
            )
            .await
        }
        Action::ScaleRouterDeployment(replicas) => {
            let rs = router_name(&name);
            modify(&stores.replica_sets, &ns, &rs, attempts, |existing| {
                if existing.spec.as_ref().and_then(|s| s.replicas) == Some(*replicas) {
                    return false;
                }
                *existing = with_replicas(existing, *replicas);
                true
            })
            .await
            .map(changed)
        }
        Action::DeleteRouterDeployment => {
            delete(&stores.replica_sets, &ns, &router_name(&name)).await
        }
        Action::EnsureService(kind) => {
            create(&stores.services, &generate_service(cluster, *kind)).await
        }
        Action::DeleteService(kind) => {
            delete(&stores.services, &ns, &kind.service_name(&name)).await
        }
    }
}

/// Create `obj`; an existing object counts as success.
async fn create<K: StoredObject>(store: &SharedStore<K>, obj: &K) -> Result<Outcome> {
    match store.create(obj).await {
        Ok(_) => Ok(Outcome::Applied),
        Err(Error::AlreadyExists { .. }) => Ok(Outcome::Unchanged),
        Err(e) => Err(e),
    }
}

/// Delete an object; an absent object counts as success.
async fn delete<K: StoredObject>(store: &SharedStore<K>, ns: &str, name: &str) -> Result<Outcome> {
    match store.delete(ns, name).await {
        Ok(()) => Ok(Outcome::Applied),
        Err(e) if e.is_not_found() => Ok(Outcome::Unchanged),
        Err(e) => Err(e),
    }
}

/// Read-modify-write `name` with `f`, re-fetching on conflict.
///
/// `f` returns false when the object already has the desired shape, in
/// which case nothing is written. An absent object is left alone. Returns
/// whether a write happened.
pub async fn modify<K, F>(
    store: &SharedStore<K>,
    ns: &str,
    name: &str,
    attempts: u32,
    mut f: F,
) -> Result<bool>
where
    K: StoredObject,
    F: FnMut(&mut K) -> bool,
{
    for attempt in 1..=attempts {
        let mut obj = match store.get(ns, name).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if !f(&mut obj) {
            return Ok(false);
        }
        match store.replace(&obj).await {
            Ok(_) => return Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(object = %name, attempt, "Write conflict, re-fetching");
            }
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Err(Error::ConflictExhausted {
        kind: K::kind(&()).to_string(),
        name: name.to_string(),
        attempts,
    })
}
