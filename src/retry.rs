// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::store::{object_key, ClusterStore, StoreError, StoredObject};
use core::future::Future;
use std::time::Duration;
use tracing::*;

/// How many times a write is attempted when it keeps hitting version conflicts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Runs `attempt` until it returns anything but a conflict, or the policy's
/// attempts are used up; in the latter case the last conflict is returned.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.attempts.max(1);
    let mut tried = 0;
    loop {
        tried += 1;
        match attempt().await {
            Err(err) if err.is_conflict() && tried < attempts => {
                debug!("Attempt {}/{} hit a conflict: {}", tried, attempts, err);
                tokio::time::sleep(policy.backoff).await;
            }
            result => return result,
        }
    }
}

/// Applies `mutate` to `current` and writes it back. On a conflict the latest
/// version is read again and `mutate` is reapplied to it before the next write.
pub async fn update_with_retry<S, K, F>(
    store: &S,
    policy: &RetryPolicy,
    current: K,
    mutate: F,
) -> Result<K, StoreError>
where
    S: ClusterStore,
    K: StoredObject,
    F: Fn(&mut K) + Send + Sync,
{
    let (namespace, name) = object_key(&current)?;
    let (namespace, name) = (namespace.as_str(), name.as_str());
    let mutate = &mutate;
    let mut first = Some(current);
    retry_on_conflict(policy, || {
        let seed = first.take();
        async move {
            let mut obj = match seed {
                Some(obj) => obj,
                None => store.get::<K>(namespace, name).await?,
            };
            mutate(&mut obj);
            store.update(&obj).await
        }
    })
    .await
}
