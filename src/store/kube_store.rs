//! Object store backed by the Kubernetes API.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Client, ResourceExt};

use super::{ObjectStore, StoredObject, WatchStream, selector_string};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};

/// [`ObjectStore`] over `kube::Api<K>`.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K: StoredObject> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn kind<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, &kind::<K>(), name))
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&selector_string(selector));
        let list = self
            .api(namespace)
            .list(&params)
            .await
            .map_err(|e| Error::from_kube(e, &kind::<K>(), namespace))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        self.api(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &kind::<K>(), &obj.name_any()))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &kind::<K>(), &name))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let value = serde_json::to_value(obj)?;
        // A merge patch carrying resourceVersion is rejected with 409 when stale.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(&namespace)
            .patch_status(&name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &kind::<K>(), &name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &kind::<K>(), name))
    }

    fn watch(&self, namespace: Option<&str>) -> WatchStream<K> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        watcher(api, watcher::Config::default().any_semantic())
            .default_backoff()
            .boxed()
    }
}
