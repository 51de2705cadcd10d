//! Shared controller helpers.
//!
//! Finalizer bookkeeping on object metadata and pod readiness predicates,
//! used by the collector, the executor and the group view.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Whether `meta` carries `finalizer`.
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add a finalizer to object metadata. Returns false if it was already present.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    // Only add if not already present
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove a finalizer from object metadata. Returns false if it was absent.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let Some(pos) = finalizers.iter().position(|f| f == finalizer) else {
        return false;
    };
    finalizers.remove(pos);
    true
}

/// Whether deletion of the object has been requested.
pub fn is_terminating(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

fn ready_condition(pod: &Pod) -> Option<&k8s_openapi::api::core::v1::PodCondition> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Ready")
}

/// Whether the pod reports `Ready=True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    ready_condition(pod).is_some_and(|c| c.status == "True")
}

/// When a not-ready pod last became not ready.
///
/// Uses the `Ready` condition's transition time, falling back to the
/// pod's creation time. `None` for ready pods.
pub fn not_ready_since(pod: &Pod) -> Option<jiff::Timestamp> {
    if is_pod_ready(pod) {
        return None;
    }
    ready_condition(pod)
        .and_then(|c| c.last_transition_time.as_ref())
        .or(pod.metadata.creation_timestamp.as_ref())
        .map(|t| t.0)
        .or_else(|| Some(jiff::Timestamp::now()))
}
