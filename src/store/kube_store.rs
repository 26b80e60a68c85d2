// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::store::{key_of, kind_of, object_key, ClusterStore, StoreError, StoredObject};
use async_trait::async_trait;
use kube::{
    api::{Api, PostParams},
    Client,
};

/// [`ClusterStore`] backed by the Kubernetes API server through kube-rs.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|err| from_kube_error::<K>(err, namespace, name))
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let api = Api::<K>::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|err| from_kube_error::<K>(err, &namespace, &name))
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let api = Api::<K>::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|err| from_kube_error::<K>(err, &namespace, &name))
    }
}

fn from_kube_error<K: StoredObject>(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    let kind = kind_of::<K>();
    let key = key_of(namespace, name);
    let resp = match err {
        kube_client::Error::Api(resp) => resp,
        err => return StoreError::Api(err),
    };
    match resp.code {
        404 => StoreError::NotFound { kind, key },
        409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists { kind, key },
        409 => StoreError::Conflict { kind, key },
        422 => StoreError::Invalid {
            kind,
            key,
            message: resp.message,
        },
        _ => StoreError::Api(kube_client::Error::Api(resp)),
    }
}
