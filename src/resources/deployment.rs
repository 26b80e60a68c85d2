// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::appservice_types::AppService;
use crate::resources::{app_labels, owned_object_meta, CONTAINER_PORT};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::ResourceExt;

pub fn make_deployment(app: &AppService) -> appsv1::Deployment {
    appsv1::Deployment {
        metadata: owned_object_meta(app),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(app.spec.replicas),
            selector: metav1::LabelSelector {
                match_labels: Some(app_labels(app)),
                ..metav1::LabelSelector::default()
            },
            template: corev1::PodTemplateSpec {
                metadata: Some(metav1::ObjectMeta {
                    labels: Some(app_labels(app)),
                    ..metav1::ObjectMeta::default()
                }),
                spec: Some(make_pod_spec(app)),
            },
            ..appsv1::DeploymentSpec::default()
        }),
        ..appsv1::Deployment::default()
    }
}

fn make_pod_spec(app: &AppService) -> corev1::PodSpec {
    corev1::PodSpec {
        containers: vec![corev1::Container {
            name: app.name_any(),
            image: Some(app.spec.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            ports: Some(vec![corev1::ContainerPort {
                container_port: CONTAINER_PORT,
                ..corev1::ContainerPort::default()
            }]),
            ..corev1::Container::default()
        }],
        ..corev1::PodSpec::default()
    }
}
