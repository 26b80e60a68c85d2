// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod error;

pub use error::Error;

use crate::appservice_types::AppService;
use crate::resources::{make_deployment, make_service};
use crate::retry::{update_with_retry, RetryPolicy};
use crate::spec_snapshot::{encode_snapshot, has_changed, load_snapshot, stamp_snapshot};
use crate::store::{key_of, ClusterStore, StoreError, StoredObject};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use tracing::*;

/// What a single reconcile invocation ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The AppService no longer exists; its owned objects are left to the garbage collector.
    Deleted,
    /// Deployment and Service were created for the first time.
    Created,
    /// The spec matches the snapshot; only a missing Service is recreated.
    Unchanged,
    /// The spec changed and Deployment, Service and snapshot were updated.
    Updated,
}

/// Drives one AppService toward its Deployment and Service.
///
/// The reconciler keeps no state between invocations. Whether the spec
/// changed since the last successful reconcile is read from the snapshot
/// annotation on the AppService, which is always written last.
pub struct Reconciler<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: ClusterStore> Reconciler<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Reconciler { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, Error> {
        let key = key_of(namespace, name);

        // Get the AppService before taking any reconciliation actions.
        let app = match self.store.get::<AppService>(namespace, name).await {
            Err(err) if err.is_not_found() => {
                info!("AppService {} not found, end reconcile", key);
                return Ok(Outcome::Deleted);
            }
            Err(err) => return Err(Error::GetAppServiceFailed(err)),
            Ok(app) => app,
        };

        match self.store.get::<appsv1::Deployment>(namespace, name).await {
            Err(err) if err.is_not_found() => self.create_owned_objects(app, &key).await,
            Err(err) => Err(Error::GetDeploymentFailed(err)),
            Ok(_) => self.reconcile_existing(app, namespace, name).await,
        }
    }

    async fn create_owned_objects(&self, app: AppService, key: &str) -> Result<Outcome, Error> {
        let deployment = make_deployment(&app);
        let service = make_service(&app);

        // The snapshot goes first: if a create below fails, the next invocation
        // still finds no Deployment and comes back here.
        self.persist_snapshot(app).await?;
        info!("Saved spec snapshot of AppService {}", key);

        info!("Create deployment: {}", key);
        self.create_if_absent(&deployment)
            .await
            .map_err(Error::CreateDeploymentFailed)?;
        info!("Create service: {}", key);
        self.create_if_absent(&service)
            .await
            .map_err(Error::CreateServiceFailed)?;
        Ok(Outcome::Created)
    }

    async fn reconcile_existing(
        &self,
        app: AppService,
        namespace: &str,
        name: &str,
    ) -> Result<Outcome, Error> {
        let key = key_of(namespace, name);
        let snapshot = load_snapshot(&app).map_err(|source| Error::CorruptState {
            key: key.clone(),
            source,
        })?;

        if !has_changed(&app.spec, &snapshot) {
            debug!("AppService {} is unchanged since the last reconcile", key);
            self.ensure_service(&app, namespace, name).await?;
            return Ok(Outcome::Unchanged);
        }

        info!(
            "Spec of AppService {} changed from {:?} to {:?}",
            key, snapshot, app.spec
        );
        self.update_deployment(&app, namespace, name).await?;
        self.update_service(&app, namespace, name).await?;
        self.persist_snapshot(app).await?;
        info!("Saved spec snapshot of AppService {}", key);
        Ok(Outcome::Updated)
    }

    async fn update_deployment(
        &self,
        app: &AppService,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let key = key_of(namespace, name);
        let desired = make_deployment(app);
        let existing = self
            .store
            .get::<appsv1::Deployment>(namespace, name)
            .await
            .map_err(Error::GetDeploymentFailed)?;
        if let Some(rv) = existing.metadata.resource_version.as_ref() {
            debug!("Current rv of deployment {}: {}", key, rv);
        }
        info!("Update deployment: {}", key);
        update_with_retry(&self.store, &self.retry, existing, |latest: &mut appsv1::Deployment| {
            latest.spec = desired.spec.clone();
        })
        .await
        .map_err(Error::UpdateDeploymentFailed)?;
        Ok(())
    }

    async fn update_service(
        &self,
        app: &AppService,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let key = key_of(namespace, name);
        let desired = make_service(app);
        let existing = match self.store.get::<corev1::Service>(namespace, name).await {
            Err(err) if err.is_not_found() => {
                warn!("Service {} is missing, create it", key);
                return self
                    .create_if_absent(&desired)
                    .await
                    .map_err(Error::CreateServiceFailed);
            }
            Err(err) => return Err(Error::GetServiceFailed(err)),
            Ok(existing) => existing,
        };
        info!("Update service: {}", key);
        update_with_retry(&self.store, &self.retry, existing, |latest: &mut corev1::Service| {
            let mut spec = desired.spec.clone();
            carry_forward_cluster_ip(latest, spec.as_mut());
            latest.spec = spec;
        })
        .await
        .map_err(Error::UpdateServiceFailed)?;
        Ok(())
    }

    // A Service lost between the two creates of the first reconcile would
    // otherwise never come back, since the Deployment alone decides which
    // branch we take.
    async fn ensure_service(
        &self,
        app: &AppService,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let key = key_of(namespace, name);
        match self.store.get::<corev1::Service>(namespace, name).await {
            Err(err) if err.is_not_found() => {
                warn!("Service {} is missing, create it", key);
                self.create_if_absent(&make_service(app))
                    .await
                    .map_err(Error::CreateServiceFailed)
            }
            Err(err) => Err(Error::GetServiceFailed(err)),
            Ok(_) => Ok(()),
        }
    }

    // Encoded once up front: a retry stamps the same snapshot onto the re-read
    // object, whose spec may have moved on since.
    async fn persist_snapshot(&self, app: AppService) -> Result<AppService, Error> {
        let encoded = encode_snapshot(&app.spec).map_err(Error::EncodeSnapshotFailed)?;
        update_with_retry(&self.store, &self.retry, app, |latest: &mut AppService| {
            stamp_snapshot(latest, &encoded);
        })
        .await
        .map_err(Error::SaveSnapshotFailed)
    }

    async fn create_if_absent<K: StoredObject>(&self, obj: &K) -> Result<(), StoreError> {
        match self.store.create(obj).await {
            Err(err) if err.is_already_exists() => {
                debug!("{}, nothing to create", err);
                Ok(())
            }
            Err(err) => Err(err),
            Ok(_) => Ok(()),
        }
    }
}

/// The cluster IP is assigned by the API server and immutable, so a replaced
/// spec has to carry the assigned one.
pub fn carry_forward_cluster_ip(
    existing: &corev1::Service,
    desired: Option<&mut corev1::ServiceSpec>,
) {
    if let (Some(current), Some(desired)) = (existing.spec.as_ref(), desired) {
        desired.cluster_ip = current.cluster_ip.clone();
        desired.cluster_ips = current.cluster_ips.clone();
    }
}
