// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// AppService describes a containerized application: which image to run and
/// how many replicas of it. The controller materializes it into a Deployment
/// and a NodePort Service, both named after the AppService.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "anvil.dev", version = "v1", kind = "AppService")]
#[kube(shortname = "appsvc", namespaced)]
pub struct AppServiceSpec {
    pub image: String,
    #[schemars(range(min = 0))]
    pub replicas: i32,
}
