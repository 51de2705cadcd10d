//! In-process object store.
//!
//! Mirrors the API server semantics the reconciler depends on: resource
//! versions bumped on every write, `Conflict` on a stale version, status
//! kept apart from spec, and deletion deferred while finalizers remain.
//! Faults can be injected per operation to exercise retry paths.
//!
//! Watches speak the `kube::runtime::watcher` event protocol, opening with
//! a full listing so a reflector can be built on top.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::watcher;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ObjectKey, ObjectStore, StoredObject, WatchStream, labels_match};
use crate::controller::error::{Error, Result};

const WATCH_CAPACITY: usize = 1024;

/// Store operation a fault can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOp {
    Get,
    List,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

/// Error returned by an injected fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Simulated timeout or 5xx
    Transient,
    /// Simulated concurrent writer
    Conflict,
}

struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    version: u64,
    writes: u64,
    faults: VecDeque<(FaultOp, Fault)>,
}

/// [`ObjectStore`] held in memory.
pub struct MemoryStore<K> {
    inner: Arc<Mutex<Inner<K>>>,
    events: broadcast::Sender<watcher::Event<K>>,
}

impl<K> Default for MemoryStore<K>
where
    K: Clone,
{
    fn default() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                writes: 0,
                faults: VecDeque::new(),
            })),
            events,
        }
    }
}

fn lock<K>(inner: &Mutex<Inner<K>>) -> MutexGuard<'_, Inner<K>> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key_of<K: StoredObject>(obj: &K) -> Result<ObjectKey> {
    ObjectKey::of(obj).ok_or_else(|| Error::MissingField("metadata.namespace/name".to_string()))
}

fn kind<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

fn status_of(value: &Value) -> Value {
    value.get("status").cloned().unwrap_or(Value::Null)
}

fn with_status<K: StoredObject>(obj: &K, status: Value) -> Result<K> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        if status.is_null() {
            map.remove("status");
        } else {
            map.insert("status".to_string(), status);
        }
    }
    Ok(serde_json::from_value(value)?)
}

impl<K: StoredObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        lock(&self.inner)
    }

    /// Fail the next `times` calls of `op` with `fault`.
    pub fn fail_next(&self, op: FaultOp, fault: Fault, times: usize) {
        let mut inner = self.lock();
        for _ in 0..times {
            inner.faults.push_back((op, fault));
        }
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// All objects, ordered by namespace and name.
    pub fn snapshot(&self) -> Vec<K> {
        self.lock().objects.values().cloned().collect()
    }

    /// Fetch without fault injection.
    pub fn peek(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// Mutate an object in place, bypassing the resource-version check.
    ///
    /// Stands in for writers outside the reconciler (kubelet, other
    /// controllers). Returns false if the object is absent.
    pub fn update_unchecked(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) -> bool {
        let updated = {
            let mut inner = self.lock();
            inner.version += 1;
            let version = inner.version;
            let Some(obj) = inner.objects.get_mut(&ObjectKey::new(namespace, name)) else {
                return false;
            };
            f(obj);
            obj.meta_mut().resource_version = Some(version.to_string());
            obj.clone()
        };
        let _ = self.events.send(watcher::Event::Apply(updated));
        true
    }

    fn take_fault(inner: &mut Inner<K>, op: FaultOp, name: &str) -> Result<()> {
        let Some(pos) = inner.faults.iter().position(|(o, _)| *o == op) else {
            return Ok(());
        };
        match inner.faults.remove(pos) {
            Some((_, Fault::Transient)) => Err(Error::Transient(format!(
                "injected {op:?} failure for {} {name}",
                kind::<K>()
            ))),
            Some((_, Fault::Conflict)) => Err(Error::Conflict {
                kind: kind::<K>(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn check_version(existing: &K, incoming: &K, name: &str) -> Result<()> {
        match &incoming.meta().resource_version {
            Some(rv) if Some(rv) != existing.meta().resource_version.as_ref() => {
                Err(Error::Conflict {
                    kind: kind::<K>(),
                    name: name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Store `obj` or drop it if it is deleting with no finalizers left.
    fn commit(&self, inner: &mut Inner<K>, key: ObjectKey, mut obj: K) -> K {
        inner.version += 1;
        inner.writes += 1;
        obj.meta_mut().resource_version = Some(inner.version.to_string());
        let meta = obj.meta();
        let released = meta.deletion_timestamp.is_some()
            && meta.finalizers.as_ref().is_none_or(Vec::is_empty);
        let event = if released {
            inner.objects.remove(&key);
            watcher::Event::Delete(obj.clone())
        } else {
            inner.objects.insert(key, obj.clone());
            watcher::Event::Apply(obj.clone())
        };
        let _ = self.events.send(event);
        obj
    }
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let mut inner = self.lock();
        Self::take_fault(&mut inner, FaultOp::Get, name)?;
        inner
            .objects
            .get(&ObjectKey::new(namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found(kind::<K>(), name))
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let mut inner = self.lock();
        Self::take_fault(&mut inner, FaultOp::List, namespace)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(key, obj)| {
                key.namespace == namespace && labels_match(obj.meta().labels.as_ref(), selector)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = key_of(obj)?;
        let mut inner = self.lock();
        Self::take_fault(&mut inner, FaultOp::Create, &key.name)?;
        if inner.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: kind::<K>(),
                name: key.name,
            });
        }
        let mut created = obj.clone();
        let uid = inner.version + 1;
        let meta = created.meta_mut();
        meta.uid.get_or_insert_with(|| format!("uid-{uid}"));
        meta.creation_timestamp = Some(Time(jiff::Timestamp::now()));
        meta.generation = Some(1);
        meta.deletion_timestamp = None;
        Ok(self.commit(&mut inner, key, created))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = key_of(obj)?;
        let mut inner = self.lock();
        Self::take_fault(&mut inner, FaultOp::Replace, &key.name)?;
        let existing = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind::<K>(), &key.name))?;
        Self::check_version(&existing, obj, &key.name)?;

        let old = serde_json::to_value(&existing)?;
        let mut updated = with_status(obj, status_of(&old))?;
        let spec_changed = old.get("spec") != serde_json::to_value(obj)?.get("spec");
        let meta = updated.meta_mut();
        let existing_meta = existing.meta();
        meta.uid = existing_meta.uid.clone();
        meta.creation_timestamp = existing_meta.creation_timestamp.clone();
        meta.deletion_timestamp = existing_meta.deletion_timestamp.clone();
        let generation = existing_meta.generation.unwrap_or(1);
        meta.generation = Some(if spec_changed { generation + 1 } else { generation });
        Ok(self.commit(&mut inner, key, updated))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let key = key_of(obj)?;
        let mut inner = self.lock();
        Self::take_fault(&mut inner, FaultOp::ReplaceStatus, &key.name)?;
        let existing = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind::<K>(), &key.name))?;
        Self::check_version(&existing, obj, &key.name)?;

        let updated = with_status(&existing, status_of(&serde_json::to_value(obj)?))?;
        Ok(self.commit(&mut inner, key, updated))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::new(namespace, name);
        let mut inner = self.lock();
        Self::take_fault(&mut inner, FaultOp::Delete, name)?;
        let mut existing = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind::<K>(), name))?;
        if existing.meta().deletion_timestamp.is_some() {
            return Ok(());
        }
        existing.meta_mut().deletion_timestamp = Some(Time(jiff::Timestamp::now()));
        self.commit(&mut inner, key, existing);
        Ok(())
    }

    fn watch(&self, namespace: Option<&str>) -> WatchStream<K> {
        let mut subscription = Subscription {
            rx: self.events.subscribe(),
            inner: self.inner.clone(),
            namespace: namespace.map(str::to_string),
            pending: VecDeque::new(),
        };
        subscription.relist();
        futures::stream::unfold(subscription, |mut subscription| async move {
            let event = subscription.next().await?;
            Some((Ok(event), subscription))
        })
        .boxed()
    }
}

/// One watcher on a [`MemoryStore`].
struct Subscription<K> {
    rx: broadcast::Receiver<watcher::Event<K>>,
    inner: Arc<Mutex<Inner<K>>>,
    namespace: Option<String>,
    pending: VecDeque<watcher::Event<K>>,
}

impl<K: StoredObject> Subscription<K> {
    /// Queue a full listing, as a watcher does on start and after falling
    /// behind.
    fn relist(&mut self) {
        let objects: Vec<K> = lock(&self.inner)
            .objects
            .values()
            .filter(|obj| self.in_scope(obj))
            .cloned()
            .collect();
        self.pending.push_back(watcher::Event::Init);
        self.pending
            .extend(objects.into_iter().map(watcher::Event::InitApply));
        self.pending.push_back(watcher::Event::InitDone);
    }

    fn in_scope(&self, obj: &K) -> bool {
        self.namespace
            .as_deref()
            .is_none_or(|ns| obj.meta().namespace.as_deref() == Some(ns))
    }

    async fn next(&mut self) -> Option<watcher::Event<K>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.rx.recv().await {
                Ok(event) => {
                    let in_scope = match &event {
                        watcher::Event::Apply(obj)
                        | watcher::Event::Delete(obj)
                        | watcher::Event::InitApply(obj) => self.in_scope(obj),
                        watcher::Event::Init | watcher::Event::InitDone => true,
                    };
                    if in_scope {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Watch fell behind, relisting");
                    self.relist();
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
