// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::{new_app, no_backoff};
use crate::resources::make_deployment;
use crate::retry::*;
use crate::store::{ClusterStore, InMemoryStore, StoreError};
use k8s_openapi::api::apps::v1 as appsv1;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

fn conflict() -> StoreError {
    StoreError::Conflict {
        kind: "Deployment".to_string(),
        key: "default/web".to_string(),
    }
}

#[tokio::test]
pub async fn test_retry_stops_at_first_success() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result = retry_on_conflict(&no_backoff(5), || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(conflict())
        } else {
            Ok(7)
        }
    })
    .await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
pub async fn test_retry_gives_up_after_budget() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<(), _> = retry_on_conflict(&no_backoff(3), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(conflict())
    })
    .await;
    assert!(result.unwrap_err().is_conflict());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
pub async fn test_retry_zero_attempts_still_tries_once() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<(), _> = retry_on_conflict(&no_backoff(0), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(conflict())
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
pub async fn test_retry_does_not_retry_other_errors() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<(), _> = retry_on_conflict(&no_backoff(5), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("down".to_string()))
    })
    .await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
pub async fn test_update_with_retry_rereads_stale_object() {
    let store = InMemoryStore::new();
    let created = store
        .create(&make_deployment(&new_app("default", "web", "nginx:1.0", 2)))
        .await
        .unwrap();

    // Another writer changes the Deployment after we read it.
    let mut other = created.clone();
    let annotations = BTreeMap::from([("owner".to_string(), "someone".to_string())]);
    other.metadata.annotations = Some(annotations);
    store.update(&other).await.unwrap();

    let set_replicas = |latest: &mut appsv1::Deployment| {
        if let Some(spec) = latest.spec.as_mut() {
            spec.replicas = Some(5);
        }
    };
    let updated = update_with_retry(&store, &no_backoff(5), created, set_replicas)
        .await
        .unwrap();

    assert_eq!(updated.spec.unwrap().replicas, Some(5));
    assert_eq!(
        updated.metadata.annotations.unwrap().get("owner"),
        Some(&"someone".to_string())
    );
}

#[tokio::test]
pub async fn test_update_with_retry_fails_on_stale_object_without_budget() {
    let store = InMemoryStore::new();
    let created = store
        .create(&make_deployment(&new_app("default", "web", "nginx:1.0", 2)))
        .await
        .unwrap();
    store.update(&created).await.unwrap();

    let policy = no_backoff(1);
    let keep = |_: &mut appsv1::Deployment| {};
    let result = update_with_retry(&store, &policy, created, keep).await;
    assert!(result.unwrap_err().is_conflict());
}
