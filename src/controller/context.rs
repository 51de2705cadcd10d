//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the object stores, the database group view, tuning settings and the
//! optional event recorder and health state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::controller::retry::RetryConfig;
use crate::crd::InnoDBCluster;
use crate::group::GroupAdmin;
use crate::health::HealthState;
use crate::store::{ObjectKey, Stores};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "mysql-operator";

/// Tuning knobs for the reconciliation loop
#[derive(Clone, Debug)]
pub struct Settings {
    /// Backoff applied to each action
    pub retry: RetryConfig,
    /// Read-modify-write attempts before `ConflictExhausted`
    pub conflict_attempts: u32,
    /// How long a member may stay not ready before the cluster is degraded
    pub member_failure_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            conflict_attempts: 5,
            member_failure_grace: Duration::from_secs(30),
        }
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Object stores the reconciler reads and writes
    pub stores: Stores,
    /// Database group administration
    pub group: Arc<dyn GroupAdmin>,
    pub settings: Settings,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Kubernetes client and reporter identity, when events are published
    events: Option<(Client, Reporter)>,
    /// Consecutive failed cycles per cluster
    failures: Arc<Mutex<BTreeMap<ObjectKey, u32>>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        stores: Stores,
        group: Arc<dyn GroupAdmin>,
        settings: Settings,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            stores,
            group,
            settings,
            health_state,
            events: None,
            failures: Arc::default(),
        }
    }

    fn failures(&self) -> MutexGuard<'_, BTreeMap<ObjectKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a failed cycle for `key`, returning the consecutive count
    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures();
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forget the failures of `key` after a clean cycle
    pub fn reset_failures(&self, key: &ObjectKey) {
        self.failures().remove(key);
    }

    /// Publish Kubernetes events through `client`
    pub fn with_events(mut self, client: Client, instance: Option<String>) -> Self {
        self.events = Some((
            client,
            Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        ));
        self
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Option<Recorder> {
        self.events
            .as_ref()
            .map(|(client, reporter)| Recorder::new(client.clone(), reporter.clone()))
    }

    async fn publish(
        &self,
        type_: EventType,
        resource: &InnoDBCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let Some(recorder) = self.recorder() else {
            return;
        };
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        resource: &InnoDBCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(EventType::Normal, resource, reason, action, note)
            .await;
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        resource: &InnoDBCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(EventType::Warning, resource, reason, action, note)
            .await;
    }
}
