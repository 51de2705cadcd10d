//! Object store abstraction over the scheduling platform.
//!
//! The reconciler never talks to the Kubernetes API directly. Every read and
//! write goes through [`ObjectStore`], which has two backends:
//!
//! - [`KubeStore`]: a thin wrapper over `kube::Api` used in production
//! - [`MemoryStore`]: an in-process store with resource versions, finalizer
//!   semantics and fault injection, used by the functional tests
//!
//! Writes are guarded by `metadata.resourceVersion`. A `replace` carrying a
//! stale version fails with [`Error::Conflict`](crate::controller::error::Error).

mod kube_store;
mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::watcher;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;
use crate::crd::InnoDBCluster;

pub use self::kube_store::KubeStore;
pub use self::memory::{Fault, FaultOp, MemoryStore};

/// Bounds shared by every object kind the store can hold.
pub trait StoredObject:
    kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Namespace/name key of a namespaced object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, if its metadata carries both namespace and name.
    pub fn of<K: kube::Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read/write access to one kind of namespaced object.
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    /// Fetch an object. Absent objects fail with `NotFound`.
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// List objects in a namespace whose labels contain every selector pair.
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>>;

    /// Create an object. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace metadata and spec. Fails with `Conflict` on a stale resource version.
    async fn replace(&self, obj: &K) -> Result<K>;

    /// Replace only the status. Fails with `Conflict` on a stale resource version.
    async fn replace_status(&self, obj: &K) -> Result<K>;

    /// Request deletion. Objects with finalizers linger with a deletion timestamp.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Watch events in one namespace or all of them, opening with a full
    /// listing.
    fn watch(&self, namespace: Option<&str>) -> WatchStream<K>;
}

/// Watch events in the `kube::runtime::watcher` protocol.
pub type WatchStream<K> =
    BoxStream<'static, std::result::Result<watcher::Event<K>, watcher::Error>>;

/// Shared handle to a store for one kind.
pub type SharedStore<K> = Arc<dyn ObjectStore<K>>;

/// The stores the reconciler works against.
#[derive(Clone)]
pub struct Stores {
    pub clusters: SharedStore<InnoDBCluster>,
    pub pods: SharedStore<Pod>,
    pub replica_sets: SharedStore<ReplicaSet>,
    pub services: SharedStore<Service>,
}

impl Stores {
    /// Stores backed by the Kubernetes API.
    pub fn kube(client: kube::Client) -> Self {
        Self {
            clusters: Arc::new(KubeStore::new(client.clone())),
            pods: Arc::new(KubeStore::new(client.clone())),
            replica_sets: Arc::new(KubeStore::new(client.clone())),
            services: Arc::new(KubeStore::new(client)),
        }
    }
}

/// In-memory backends, kept typed so tests can reach fault injection.
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub clusters: Arc<MemoryStore<InnoDBCluster>>,
    pub pods: Arc<MemoryStore<Pod>>,
    pub replica_sets: Arc<MemoryStore<ReplicaSet>>,
    pub services: Arc<MemoryStore<Service>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased view for the reconciler.
    pub fn stores(&self) -> Stores {
        Stores {
            clusters: self.clusters.clone(),
            pods: self.pods.clone(),
            replica_sets: self.replica_sets.clone(),
            services: self.services.clone(),
        }
    }
}

/// Whether `labels` contains every pair of `selector`.
pub fn labels_match(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Render a selector as a Kubernetes label selector string.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
