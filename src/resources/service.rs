// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::appservice_types::AppService;
use crate::resources::{app_labels, owned_object_meta, CONTAINER_PORT, NODE_PORT, SERVICE_PORT};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Builds the NodePort Service in front of the AppService pods.
///
/// The cluster IP is left unset: the API server assigns it on creation and
/// the reconciler copies it forward whenever the Service is replaced.
pub fn make_service(app: &AppService) -> corev1::Service {
    corev1::Service {
        metadata: owned_object_meta(app),
        spec: Some(corev1::ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(app_labels(app)),
            ports: Some(vec![corev1::ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                node_port: Some(NODE_PORT),
                ..corev1::ServicePort::default()
            }]),
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    }
}
