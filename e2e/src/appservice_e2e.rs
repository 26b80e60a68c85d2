// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use appservice_controller::appservice_types::AppService;
use appservice_controller::spec_snapshot::{load_snapshot, SNAPSHOT_ANNOTATION};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{api::Api, discovery::Discovery, Client};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::*;

use crate::common::*;

pub fn app_service() -> String {
    "
    apiVersion: anvil.dev/v1
    kind: AppService
    metadata:
      name: web
      namespace: default
    spec:
      image: nginx:1.25
      replicas: 2
    "
    .to_string()
}

fn cluster_ip(svc: &Service) -> Option<String> {
    svc.spec.as_ref().and_then(|spec| spec.cluster_ip.clone())
}

/// Polls until the Deployment runs `image` with `replicas` and the AppService snapshot agrees.
async fn wait_for_deployment(
    client: Client,
    name: &str,
    image: &str,
    replicas: i32,
) -> Result<(), Error> {
    let timeout = Duration::from_secs(100);
    let start = Instant::now();
    let deploy_api: Api<Deployment> = Api::default_namespaced(client.clone());
    let app_api: Api<AppService> = Api::default_namespaced(client);
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            error!("Time out waiting for deployment {}", name);
            return Err(Error::Timeout);
        }

        let deployment = match deploy_api.get(name).await {
            Err(e) => {
                info!("Get deployment failed with error {}.", e);
                continue;
            }
            Ok(deployment) => deployment,
        };
        let spec = match deployment.spec {
            None => return Err(Error::DeploymentFailed),
            Some(spec) => spec,
        };
        if spec.replicas != Some(replicas) {
            info!(
                "Deployment replicas is {:?}, waiting for {}.",
                spec.replicas, replicas
            );
            continue;
        }
        let containers = spec.template.spec.map(|pod| pod.containers);
        let images: Vec<_> = containers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.image)
            .collect();
        if images != vec![image.to_string()] {
            info!("Deployment images are {:?}, waiting for {}.", images, image);
            continue;
        }

        match app_api.get(name).await.map(|app| load_snapshot(&app)) {
            Ok(Ok(snapshot)) if snapshot.replicas == replicas && snapshot.image == image => break,
            Ok(Ok(snapshot)) => info!("Snapshot is still {:?}.", snapshot),
            Ok(Err(e)) => info!("Annotation {} not usable: {}.", SNAPSHOT_ANNOTATION, e),
            Err(e) => info!("Get AppService failed with error {}.", e),
        }
    }
    info!(
        "Deployment {} has {} replicas of {}.",
        name, replicas, image
    );
    Ok(())
}

async fn wait_for_service(client: Client, name: &str) -> Result<Service, Error> {
    let timeout = Duration::from_secs(100);
    let start = Instant::now();
    let svc_api: Api<Service> = Api::default_namespaced(client);
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            error!("Time out waiting for service {}", name);
            return Err(Error::Timeout);
        }
        match svc_api.get(name).await {
            Err(e) => info!("Get service failed with error {}.", e),
            Ok(svc) => return Ok(svc),
        }
    }
}

pub async fn desired_state_test(client: Client, name: &str) -> Result<(), Error> {
    let image = "nginx:1.25";
    wait_for_deployment(client.clone(), name, image, 2).await?;
    let svc = wait_for_service(client, name).await?;
    let spec = svc.spec.as_ref().ok_or(Error::ServiceFailed)?;
    let node_port = spec
        .ports
        .as_ref()
        .and_then(|ports| ports.first())
        .and_then(|port| port.node_port);
    let is_node_port = spec.type_.as_deref() == Some("NodePort") && node_port == Some(30080);
    if !is_node_port || cluster_ip(&svc).is_none() {
        error!("Service {} is {:?}.", name, spec);
        return Err(Error::ServiceFailed);
    }
    info!("Desired state test passed.");
    Ok(())
}

pub async fn scaling_test(client: Client, name: &str) -> Result<(), Error> {
    let svc_api: Api<Service> = Api::default_namespaced(client.clone());
    let ip_before = cluster_ip(&svc_api.get(name).await?);

    run_command(
        "kubectl",
        vec![
            "patch",
            "appsvc",
            name,
            "--type=merge",
            "-p",
            "{\"spec\":{\"replicas\":5}}",
        ],
    )?;
    wait_for_deployment(client, name, "nginx:1.25", 5).await?;

    let ip_after = cluster_ip(&svc_api.get(name).await?);
    if ip_after != ip_before {
        error!("Cluster IP changed from {:?} to {:?}.", ip_before, ip_after);
        return Err(Error::ServiceFailed);
    }
    info!("Scaling test passed.");
    Ok(())
}

pub async fn image_test(client: Client, name: &str) -> Result<(), Error> {
    run_command(
        "kubectl",
        vec![
            "patch",
            "appsvc",
            name,
            "--type=merge",
            "-p",
            "{\"spec\":{\"image\":\"nginx:1.26\"}}",
        ],
    )?;
    wait_for_deployment(client, name, "nginx:1.26", 5).await?;
    info!("Image test passed.");
    Ok(())
}

pub async fn service_recreation_test(client: Client, name: &str) -> Result<(), Error> {
    run_command("kubectl", vec!["delete", "service", name])?;
    let svc = wait_for_service(client, name).await?;
    if cluster_ip(&svc).is_none() {
        return Err(Error::ServiceFailed);
    }
    info!("Service recreation test passed.");
    Ok(())
}

pub async fn appservice_e2e_test() -> Result<(), Error> {
    // check if the CRD is already registered
    let client = Client::try_default().await?;
    let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
    match crd_api.get("appservices.anvil.dev").await {
        Err(e) => {
            error!("AppService CRD not found, create it first.");
            return Err(Error::CRDGetFailed(e));
        }
        Ok(_) => info!("AppService CRD found, continue to run the e2e test."),
    }

    let discovery = Discovery::new(client.clone()).run().await?;
    let name = apply(app_service(), client.clone(), &discovery).await?;

    desired_state_test(client.clone(), &name).await?;
    scaling_test(client.clone(), &name).await?;
    image_test(client.clone(), &name).await?;
    service_recreation_test(client.clone(), &name).await?;

    info!("E2e test passed.");
    Ok(())
}
