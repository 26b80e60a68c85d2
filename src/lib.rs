// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod appservice_types;
pub mod config;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod shim_layer;
pub mod spec_snapshot;
pub mod store;
