// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::spec_snapshot::SnapshotError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error("Failed to get AppService: {0}")]
    GetAppServiceFailed(#[source] StoreError),
    #[error("Failed to get Deployment: {0}")]
    GetDeploymentFailed(#[source] StoreError),
    #[error("Failed to get Service: {0}")]
    GetServiceFailed(#[source] StoreError),
    #[error("Failed to encode spec snapshot: {0}")]
    EncodeSnapshotFailed(#[source] SnapshotError),
    #[error("Failed to save spec snapshot: {0}")]
    SaveSnapshotFailed(#[source] StoreError),
    #[error("Failed to create Deployment: {0}")]
    CreateDeploymentFailed(#[source] StoreError),
    #[error("Failed to create Service: {0}")]
    CreateServiceFailed(#[source] StoreError),
    #[error("Failed to update Deployment: {0}")]
    UpdateDeploymentFailed(#[source] StoreError),
    #[error("Failed to update Service: {0}")]
    UpdateServiceFailed(#[source] StoreError),
    #[error("Spec snapshot of AppService {key} is unusable while its Deployment exists: {source}")]
    CorruptState {
        key: String,
        #[source]
        source: SnapshotError,
    },
}

impl Error {
    /// Corrupt state needs an operator to fix the annotation; requeueing cannot help.
    pub fn is_corrupt_state(&self) -> bool {
        matches!(self, Error::CorruptState { .. })
    }
}
