// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::appservice_types::AppService;
use crate::config::ControllerConfig;
use crate::reconciler::{Error, Outcome, Reconciler};
use crate::store::{ClusterStore, KubeStore};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

// The shim layer connects the reconciler to the kube-rs controller runtime.
// kube-rs invokes reconcile whenever its watchers see an event on an
// AppService or on a Deployment or Service owned by one.

/// Shared by every reconcile invocation.
pub struct Data<S> {
    pub reconciler: Reconciler<S>,
    pub config: ControllerConfig,
}

pub async fn run_controller(config: ControllerConfig) -> Result<()> {
    let client = Client::try_default().await?;
    let apps = Api::<AppService>::all(client.clone());
    let deployments = Api::<appsv1::Deployment>::all(client.clone());
    let services = Api::<corev1::Service>::all(client.clone());

    let data = Arc::new(Data {
        reconciler: Reconciler::new(KubeStore::new(client), config.retry_policy()),
        config,
    });

    info!("starting appservice-controller");
    Controller::new(apps, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .owns(services, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, data)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("reconciled {:?}", o),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;
    info!("appservice-controller terminated");
    Ok(())
}

pub async fn reconcile<S: ClusterStore>(
    app: Arc<AppService>,
    data: Arc<Data<S>>,
) -> Result<Action, Error> {
    let name = app
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = app
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    let outcome = data.reconciler.reconcile(namespace, name).await?;
    debug!(
        "Reconciling AppService {}/{}: {:?}",
        namespace, name, outcome
    );
    Ok(action_after(outcome, &data.config))
}

pub fn error_policy<S>(app: Arc<AppService>, err: &Error, data: Arc<Data<S>>) -> Action {
    match requeue_after_error(err, &data.config) {
        Some(delay) => {
            warn!(
                "Reconciling AppService {} failed, retry in {:?}: {}",
                app.name_any(),
                delay,
                err
            );
            Action::requeue(delay)
        }
        None => {
            error!(
                "Reconciling AppService {} needs manual repair: {}",
                app.name_any(),
                err
            );
            Action::await_change()
        }
    }
}

/// `None` means wait for the next change to the object instead of requeueing.
pub fn requeue_after_error(err: &Error, config: &ControllerConfig) -> Option<Duration> {
    if err.is_corrupt_state() {
        None
    } else {
        Some(config.error_requeue())
    }
}

pub fn requeue_after_success(outcome: Outcome, config: &ControllerConfig) -> Option<Duration> {
    match outcome {
        Outcome::Deleted => None,
        _ => config.resync(),
    }
}

fn action_after(outcome: Outcome, config: &ControllerConfig) -> Action {
    match requeue_after_success(outcome, config) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}
