// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod in_memory;
pub mod kube_store;

pub use in_memory::InMemoryStore;
pub use kube_store::KubeStore;

use async_trait::async_trait;
use core::fmt::Debug;
use kube::api::{Resource, ResourceExt};
use kube_core::NamespaceResourceScope;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Any namespaced, statically typed object the reconciler reads or writes.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },
    #[error("{kind} {key} has been modified since it was read")]
    Conflict { kind: String, key: String },
    #[error("{kind} {key} is invalid: {message}")]
    Invalid {
        kind: String,
        key: String,
        message: String,
    },
    #[error("API request failed: {0}")]
    Api(#[source] kube::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("object cannot be (de)serialized: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Versioned object storage with optimistic concurrency.
///
/// `update` must reject an object whose `metadata.resourceVersion` no longer
/// matches the stored one with [`StoreError::Conflict`].
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError>;
}

pub fn kind_of<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

pub fn key_of(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Namespace and name of `obj`, which every write needs.
pub fn object_key<K: StoredObject>(obj: &K) -> Result<(String, String), StoreError> {
    let name = obj.meta().name.clone().ok_or_else(|| StoreError::Invalid {
        kind: kind_of::<K>(),
        key: "<unnamed>".to_string(),
        message: "metadata.name is required".to_string(),
    })?;
    let namespace = obj.namespace().ok_or_else(|| StoreError::Invalid {
        kind: kind_of::<K>(),
        key: name.clone(),
        message: "metadata.namespace is required".to_string(),
    })?;
    Ok((namespace, name))
}
