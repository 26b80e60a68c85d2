// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! The last reconciled AppService spec, persisted as an annotation on the
//! AppService itself.
//!
//! Keeping the snapshot inside the object's own metadata means it is versioned
//! together with the spec it describes, so no external store has to be kept
//! consistent with the cluster.
use crate::appservice_types::{AppService, AppServiceSpec};
use std::collections::BTreeMap;
use thiserror::Error;

pub const SNAPSHOT_ANNOTATION: &str = "anvil.dev/last-applied-spec";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("spec snapshot annotation is missing")]
    Missing,
    #[error("spec snapshot annotation cannot be decoded: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("spec cannot be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

pub fn encode_snapshot(spec: &AppServiceSpec) -> Result<String, SnapshotError> {
    serde_json::to_string(spec).map_err(SnapshotError::Encode)
}

/// Writes `encoded` under the reserved key, creating the annotation map if needed.
pub fn stamp_snapshot(app: &mut AppService, encoded: &str) {
    app.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(SNAPSHOT_ANNOTATION.to_string(), encoded.to_string());
}

/// Records the object's current spec as its snapshot.
///
/// Only the returned object changes; persisting it is up to the caller.
pub fn save_snapshot(mut app: AppService) -> Result<AppService, SnapshotError> {
    let encoded = encode_snapshot(&app.spec)?;
    stamp_snapshot(&mut app, &encoded);
    Ok(app)
}

pub fn load_snapshot(app: &AppService) -> Result<AppServiceSpec, SnapshotError> {
    let encoded = app
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(SNAPSHOT_ANNOTATION))
        .ok_or(SnapshotError::Missing)?;
    serde_json::from_str(encoded).map_err(SnapshotError::Malformed)
}

pub fn has_changed(current: &AppServiceSpec, snapshot: &AppServiceSpec) -> bool {
    current != snapshot
}
