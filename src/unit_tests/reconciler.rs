// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::{new_app, no_backoff};
use crate::appservice_types::AppService;
use crate::reconciler::{carry_forward_cluster_ip, Error, Outcome, Reconciler};
use crate::resources::{make_deployment, make_service};
use crate::spec_snapshot::{load_snapshot, stamp_snapshot, SnapshotError};
use crate::store::in_memory::{InjectedError, Operation};
use crate::store::{ClusterStore, InMemoryStore, StoreError};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;

async fn reconciler_with(app: AppService) -> Reconciler<InMemoryStore> {
    let store = InMemoryStore::new();
    store.create(&app).await.unwrap();
    Reconciler::new(store, no_backoff(5))
}

async fn reconcile_web(reconciler: &Reconciler<InMemoryStore>) -> Outcome {
    reconciler.reconcile("default", "web").await.unwrap()
}

async fn fresh_web() -> Reconciler<InMemoryStore> {
    let app = new_app("default", "web", "nginx:1.0", 2);
    reconciler_with(app).await
}

async fn created_web() -> Reconciler<InMemoryStore> {
    let reconciler = fresh_web().await;
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Created);
    reconciler
}

async fn edit_app(store: &InMemoryStore, edit: impl Fn(&mut AppService)) {
    let mut app = web_app(store).await;
    edit(&mut app);
    store.update(&app).await.unwrap();
}

async fn web_app(store: &InMemoryStore) -> AppService {
    store.get::<AppService>("default", "web").await.unwrap()
}

async fn deployment(store: &InMemoryStore) -> appsv1::Deployment {
    store
        .get::<appsv1::Deployment>("default", "web")
        .await
        .unwrap()
}

async fn service(store: &InMemoryStore) -> corev1::Service {
    store
        .get::<corev1::Service>("default", "web")
        .await
        .unwrap()
}

fn image_of(deployment: appsv1::Deployment) -> Option<String> {
    let pod = deployment.spec?.template.spec?;
    pod.containers.into_iter().next()?.image
}

fn cluster_ip(service: &corev1::Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.clone())
}

#[tokio::test]
pub async fn test_first_reconcile_creates_everything() {
    let reconciler = created_web().await;
    let store = reconciler.store();

    let app = web_app(store).await;
    assert_eq!(load_snapshot(&app).unwrap(), app.spec);

    let deployment = deployment(store).await;
    assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(2));
    let owner = &deployment.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(Some(owner.uid.clone()), app.metadata.uid);
    assert_eq!(image_of(deployment), Some("nginx:1.0".to_string()));

    let service = service(store).await;
    assert!(cluster_ip(&service).is_some());
    let ports = service.spec.unwrap().ports.unwrap();
    assert_eq!(ports[0].node_port, Some(30080));
    // Seeded AppService, snapshot, Deployment, Service.
    assert_eq!(store.writes(), 4);
}

#[tokio::test]
pub async fn test_reconcile_is_idempotent() {
    let reconciler = created_web().await;
    let writes = reconciler.store().writes();
    for _ in 0..3 {
        assert_eq!(reconcile_web(&reconciler).await, Outcome::Unchanged);
    }
    assert_eq!(reconciler.store().writes(), writes);
}

#[tokio::test]
pub async fn test_deleted_app_writes_nothing() {
    let reconciler = Reconciler::new(InMemoryStore::new(), no_backoff(5));
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Deleted);
    let store = reconciler.store();
    assert_eq!(store.writes(), 0);
    assert!(!store.contains::<appsv1::Deployment>("default", "web"));
}

#[tokio::test]
pub async fn test_scale_up_keeps_cluster_ip() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    let ip = cluster_ip(&service(store).await);

    edit_app(store, |app| app.spec.replicas = 5).await;
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Updated);

    assert_eq!(deployment(store).await.spec.unwrap().replicas, Some(5));
    assert_eq!(cluster_ip(&service(store).await), ip);
    let app = web_app(store).await;
    assert_eq!(load_snapshot(&app).unwrap().replicas, 5);

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Unchanged);
}

#[tokio::test]
pub async fn test_image_change_rolls_deployment() {
    let reconciler = created_web().await;
    let store = reconciler.store();

    let image = "nginx:1.1".to_string();
    edit_app(store, |app| app.spec.image = image.clone()).await;
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Updated);

    let image = image_of(deployment(store).await);
    assert_eq!(image, Some("nginx:1.1".to_string()));
}

#[tokio::test]
pub async fn test_cluster_ip_stable_across_updates() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    let ip = cluster_ip(&service(store).await);
    assert!(ip.is_some());

    for replicas in 3..10 {
        edit_app(store, |app| app.spec.replicas = replicas).await;
        assert_eq!(reconcile_web(&reconciler).await, Outcome::Updated);
        assert_eq!(cluster_ip(&service(store).await), ip);
        let snapshot = load_snapshot(&web_app(store).await).unwrap();
        assert_eq!(snapshot.replicas, replicas);
    }
}

#[tokio::test]
pub async fn test_update_overwrites_drifted_deployment() {
    let reconciler = created_web().await;
    let store = reconciler.store();

    let mut drifted = deployment(store).await;
    drifted.spec.as_mut().unwrap().replicas = Some(9);
    store.update(&drifted).await.unwrap();

    edit_app(store, |app| app.spec.replicas = 3).await;
    reconciler.reconcile("default", "web").await.unwrap();
    assert_eq!(deployment(store).await.spec.unwrap().replicas, Some(3));
}

#[tokio::test]
pub async fn test_update_survives_conflicts_within_budget() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    edit_app(store, |app| app.spec.replicas = 5).await;

    let conflict = InjectedError::Conflict;
    store.inject_fault("Deployment", Operation::Update, conflict, 4);
    store.inject_fault("Service", Operation::Update, conflict, 2);
    store.inject_fault("AppService", Operation::Update, conflict, 1);

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Updated);
    assert_eq!(deployment(store).await.spec.unwrap().replicas, Some(5));
    let app = web_app(store).await;
    assert_eq!(load_snapshot(&app).unwrap().replicas, 5);
}

#[tokio::test]
pub async fn test_conflicts_beyond_budget_leave_snapshot_behind() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    edit_app(store, |app| app.spec.replicas = 5).await;

    let conflict = InjectedError::Conflict;
    store.inject_fault("Deployment", Operation::Update, conflict, 5);
    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(
        err,
        Error::UpdateDeploymentFailed(StoreError::Conflict { .. })
    ));

    let app = web_app(store).await;
    assert_eq!(load_snapshot(&app).unwrap().replicas, 2);
    assert_eq!(deployment(store).await.spec.unwrap().replicas, Some(2));

    // The next invocation sees the change again and completes it.
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Updated);
    assert_eq!(deployment(store).await.spec.unwrap().replicas, Some(5));
}

#[tokio::test]
pub async fn test_service_failure_keeps_snapshot_old() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    edit_app(store, |app| app.spec.replicas = 5).await;

    let unavailable = InjectedError::Unavailable;
    store.inject_fault("Service", Operation::Update, unavailable, 1);
    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(
        err,
        Error::UpdateServiceFailed(StoreError::Unavailable(_))
    ));

    let app = web_app(store).await;
    assert_eq!(load_snapshot(&app).unwrap().replicas, 2);
}

#[tokio::test]
pub async fn test_missing_snapshot_is_corrupt_state() {
    let reconciler = fresh_web().await;
    let store = reconciler.store();
    let app = web_app(store).await;
    store.create(&make_deployment(&app)).await.unwrap();
    let writes = store.writes();

    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(err.is_corrupt_state());
    assert!(matches!(
        err,
        Error::CorruptState {
            source: SnapshotError::Missing,
            ..
        }
    ));
    assert_eq!(store.writes(), writes);
}

#[tokio::test]
pub async fn test_malformed_snapshot_is_corrupt_state() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    edit_app(store, |app| stamp_snapshot(app, "not json")).await;
    let writes = store.writes();

    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(
        err,
        Error::CorruptState {
            source: SnapshotError::Malformed(_),
            ..
        }
    ));
    assert_eq!(store.writes(), writes);
}

#[tokio::test]
pub async fn test_missing_service_is_recreated() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    assert!(store.delete::<corev1::Service>("default", "web"));

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Unchanged);
    assert!(cluster_ip(&service(store).await).is_some());
}

#[tokio::test]
pub async fn test_missing_service_is_recreated_on_update() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    assert!(store.delete::<corev1::Service>("default", "web"));
    edit_app(store, |app| app.spec.replicas = 5).await;

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Updated);
    assert!(store.contains::<corev1::Service>("default", "web"));
}

#[tokio::test]
pub async fn test_partial_first_create_heals() {
    let reconciler = fresh_web().await;
    let store = reconciler.store();
    let unavailable = InjectedError::Unavailable;
    store.inject_fault("Service", Operation::Create, unavailable, 1);

    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(err, Error::CreateServiceFailed(_)));
    assert!(store.contains::<appsv1::Deployment>("default", "web"));
    assert!(!store.contains::<corev1::Service>("default", "web"));

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Unchanged);
    assert!(store.contains::<corev1::Service>("default", "web"));
}

#[tokio::test]
pub async fn test_failed_deployment_create_retries_first_create() {
    let reconciler = fresh_web().await;
    let store = reconciler.store();
    store.inject_fault(
        "Deployment",
        Operation::Create,
        InjectedError::Unavailable,
        1,
    );

    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(err, Error::CreateDeploymentFailed(_)));
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Created);
    assert!(store.contains::<corev1::Service>("default", "web"));
}

#[tokio::test]
pub async fn test_first_create_snapshot_survives_conflicts() {
    let reconciler = fresh_web().await;
    let store = reconciler.store();
    let conflict = InjectedError::Conflict;
    store.inject_fault("AppService", Operation::Update, conflict, 3);

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Created);
    let app = web_app(store).await;
    assert_eq!(load_snapshot(&app).unwrap(), app.spec);
    assert!(store.contains::<corev1::Service>("default", "web"));
    // Seeded AppService plus one write each for snapshot, Deployment, Service.
    assert_eq!(store.writes(), 4);

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Unchanged);
}

#[tokio::test]
pub async fn test_existing_service_is_adopted_on_first_create() {
    let reconciler = fresh_web().await;
    let store = reconciler.store();
    let app = web_app(store).await;
    let existing = store.create(&make_service(&app)).await.unwrap();

    assert_eq!(reconcile_web(&reconciler).await, Outcome::Created);
    assert_eq!(cluster_ip(&service(store).await), cluster_ip(&existing));
}

#[tokio::test]
pub async fn test_unavailable_store_is_surfaced() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    let unavailable = InjectedError::Unavailable;
    store.inject_fault("Deployment", Operation::Get, unavailable, 1);
    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(
        err,
        Error::GetDeploymentFailed(StoreError::Unavailable(_))
    ));
    assert!(!err.is_corrupt_state());

    store.inject_fault("AppService", Operation::Get, unavailable, 1);
    let err = reconciler.reconcile("default", "web").await.unwrap_err();
    assert!(matches!(
        err,
        Error::GetAppServiceFailed(StoreError::Unavailable(_))
    ));
}

#[tokio::test]
pub async fn test_reconcilers_are_isolated_per_app() {
    let reconciler = created_web().await;
    let store = reconciler.store();
    let api = new_app("default", "api", "httpd:2", 1);
    store.create(&api).await.unwrap();

    let outcome = reconciler.reconcile("default", "api").await.unwrap();
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(reconcile_web(&reconciler).await, Outcome::Unchanged);
    let api = store
        .get::<corev1::Service>("default", "api")
        .await
        .unwrap();
    assert_ne!(cluster_ip(&api), cluster_ip(&service(store).await));
}

#[test]
pub fn test_carry_forward_cluster_ip() {
    let app = new_app("default", "web", "nginx:1.0", 2);
    let mut existing = make_service(&app);
    let existing_spec = existing.spec.as_mut().unwrap();
    existing_spec.cluster_ip = Some("10.96.0.7".to_string());
    existing_spec.cluster_ips = Some(vec!["10.96.0.7".to_string()]);

    let mut desired = make_service(&app).spec;
    carry_forward_cluster_ip(&existing, desired.as_mut());
    let desired = desired.unwrap();
    assert_eq!(desired.cluster_ip, Some("10.96.0.7".to_string()));
    assert_eq!(desired.cluster_ips, Some(vec!["10.96.0.7".to_string()]));

    // Nothing to carry when the desired object has no spec.
    carry_forward_cluster_ip(&existing, None);
}
