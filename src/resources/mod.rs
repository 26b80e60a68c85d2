// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod deployment;
pub mod service;

pub use deployment::make_deployment;
pub use service::make_service;

use crate::appservice_types::AppService;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Port the application container listens on.
pub const CONTAINER_PORT: i32 = 80;
/// Port the Service exposes inside the cluster.
pub const SERVICE_PORT: i32 = 80;
/// Port the Service exposes on every node.
pub const NODE_PORT: i32 = 30080;

/// The label set shared by the pod template and both selectors.
pub fn app_labels(app: &AppService) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.name_any())])
}

// Derived objects are a facsimile of the owner's identity: same name, same namespace,
// and a controller reference back to it so the garbage collector can cascade deletes.
pub(crate) fn owned_object_meta(app: &AppService) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(app.name_any()),
        namespace: app.namespace(),
        labels: Some(app_labels(app)),
        owner_references: app.controller_owner_ref(&()).map(|oref| vec![oref]),
        ..metav1::ObjectMeta::default()
    }
}
