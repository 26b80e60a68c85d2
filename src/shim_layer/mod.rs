// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod controller_runtime;

pub use controller_runtime::{
    error_policy, reconcile, requeue_after_error, requeue_after_success, run_controller, Data,
};
