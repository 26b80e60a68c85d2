// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! An in-process stand-in for the API server.
//!
//! It keeps the parts of the API server's behavior the reconciler depends on:
//! every write bumps a global resource version, updates carrying a stale
//! resource version are rejected with a conflict, Services get a cluster IP
//! on creation and that IP cannot be changed afterwards. Faults can be
//! injected per kind and operation to exercise the failure paths.
use crate::store::{key_of, kind_of, object_key, ClusterStore, StoreError, StoredObject};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectedError {
    Conflict,
    Unavailable,
}

#[derive(Clone, Debug)]
struct Fault {
    kind: String,
    operation: Operation,
    error: InjectedError,
    remaining: usize,
}

impl Fault {
    fn applies_to(&self, kind: &str, operation: Operation) -> bool {
        self.remaining > 0 && self.kind == kind && self.operation == operation
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectRef {
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Default)]
struct ApiServerState {
    resources: BTreeMap<ObjectRef, Value>,
    resource_version_counter: u64,
    uid_counter: u64,
    cluster_ip_counter: u32,
    faults: Vec<Fault>,
    writes: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<ApiServerState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, ApiServerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `times` calls of `operation` on objects of `kind` fail with `error`.
    pub fn inject_fault(
        &self,
        kind: &str,
        operation: Operation,
        error: InjectedError,
        times: usize,
    ) {
        self.lock().faults.push(Fault {
            kind: kind.to_string(),
            operation,
            error,
            remaining: times,
        });
    }

    /// Number of successful creates and updates so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn contains<K: StoredObject>(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .resources
            .contains_key(&object_ref::<K>(namespace, name))
    }

    /// Removes an object the way an external actor (a user, the garbage collector) would.
    pub fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> bool {
        let mut state = self.lock();
        let removed = state
            .resources
            .remove(&object_ref::<K>(namespace, name))
            .is_some();
        if removed {
            state.resource_version_counter += 1;
        }
        removed
    }
}

fn object_ref<K: StoredObject>(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef {
        kind: kind_of::<K>(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

impl ApiServerState {
    fn take_fault<K: StoredObject>(
        &mut self,
        operation: Operation,
        key: &ObjectRef,
    ) -> Result<(), StoreError> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.applies_to(&key.kind, operation));
        match fault {
            None => Ok(()),
            Some(fault) => {
                fault.remaining -= 1;
                let key = key_of(&key.namespace, &key.name);
                match fault.error {
                    InjectedError::Conflict => Err(StoreError::Conflict {
                        kind: kind_of::<K>(),
                        key,
                    }),
                    InjectedError::Unavailable => Err(StoreError::Unavailable(format!(
                        "injected failure on {:?} {} {}",
                        operation,
                        kind_of::<K>(),
                        key
                    ))),
                }
            }
        }
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version_counter += 1;
        self.resource_version_counter.to_string()
    }

    fn allocate_cluster_ip(&mut self) -> String {
        self.cluster_ip_counter += 1;
        format!(
            "10.96.{}.{}",
            self.cluster_ip_counter / 250,
            self.cluster_ip_counter % 250 + 1
        )
    }
}

fn to_value<K: StoredObject>(obj: &K) -> Result<Value, StoreError> {
    serde_json::to_value(obj).map_err(StoreError::Serialization)
}

fn from_value<K: StoredObject>(value: Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(StoreError::Serialization)
}

fn cluster_ip(value: &Value) -> Option<&str> {
    value
        .pointer("/spec/clusterIP")
        .and_then(Value::as_str)
        .filter(|ip| !ip.is_empty())
}

#[async_trait]
impl ClusterStore for InMemoryStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let mut state = self.lock();
        let key = object_ref::<K>(namespace, name);
        state.take_fault::<K>(Operation::Get, &key)?;
        match state.resources.get(&key) {
            None => Err(StoreError::NotFound {
                kind: key.kind,
                key: key_of(namespace, name),
            }),
            Some(value) => from_value(value.clone()),
        }
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let mut state = self.lock();
        let key = object_ref::<K>(&namespace, &name);
        state.take_fault::<K>(Operation::Create, &key)?;
        if state.resources.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.kind,
                key: key_of(&namespace, &name),
            });
        }

        let mut created = obj.clone();
        state.uid_counter += 1;
        let uid = format!("uid-{}", state.uid_counter);
        let resource_version = state.next_resource_version();
        let meta = created.meta_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some(resource_version);
        meta.deletion_timestamp = None;
        let mut value = to_value(&created)?;

        if key.kind == "Service" && cluster_ip(&value).is_none() {
            let ip = state.allocate_cluster_ip();
            if let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) {
                spec.insert("clusterIP".to_string(), Value::String(ip.clone()));
                spec.insert("clusterIPs".to_string(), json!([ip]));
            }
        }

        state.resources.insert(key, value.clone());
        state.writes += 1;
        from_value(value)
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let mut state = self.lock();
        let key = object_ref::<K>(&namespace, &name);
        state.take_fault::<K>(Operation::Update, &key)?;
        let old_value = match state.resources.get(&key) {
            None => {
                return Err(StoreError::NotFound {
                    kind: key.kind,
                    key: key_of(&namespace, &name),
                })
            }
            Some(value) => value.clone(),
        };
        let old: K = from_value(old_value.clone())?;

        let expected = obj.meta().resource_version.as_ref();
        if expected.is_some() && expected != old.meta().resource_version.as_ref() {
            return Err(StoreError::Conflict {
                kind: key.kind,
                key: key_of(&namespace, &name),
            });
        }

        let mut value = to_value(obj)?;
        if key.kind == "Service" {
            if let Some(old_ip) = cluster_ip(&old_value) {
                if cluster_ip(&value) != Some(old_ip) {
                    return Err(StoreError::Invalid {
                        kind: key.kind,
                        key: key_of(&namespace, &name),
                        message: format!(
                            "spec.clusterIP: Invalid value: {:?}: field is immutable",
                            cluster_ip(&value).unwrap_or_default()
                        ),
                    });
                }
            }
        }

        let mut updated: K = from_value(value)?;
        let resource_version = state.next_resource_version();
        let meta = updated.meta_mut();
        meta.uid = old.meta().uid.clone();
        meta.resource_version = Some(resource_version);
        meta.deletion_timestamp = old.meta().deletion_timestamp.clone();
        value = to_value(&updated)?;

        // Status is owned by the status subresource and survives a spec update.
        if let (Some(status), Some(object)) = (old_value.get("status"), value.as_object_mut()) {
            object.insert("status".to_string(), status.clone());
        }

        state.resources.insert(key, value.clone());
        state.writes += 1;
        from_value(value)
    }
}
