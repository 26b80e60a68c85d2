// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::retry::RetryPolicy;
use clap::Args;
use std::time::Duration;

#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Attempts per write before a version conflict fails the reconcile
    #[arg(long, env = "APPSERVICE_RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    /// Pause between conflicting write attempts, in milliseconds
    #[arg(long, env = "APPSERVICE_RETRY_BACKOFF_MS", default_value_t = 10)]
    pub retry_backoff_ms: u64,

    /// Delay before a failed reconcile is retried, in seconds
    #[arg(long, env = "APPSERVICE_ERROR_REQUEUE_SECS", default_value_t = 10)]
    pub error_requeue_secs: u64,

    /// Reconcile every AppService at this interval even without changes, in seconds
    #[arg(long, env = "APPSERVICE_RESYNC_SECS")]
    pub resync_secs: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            retry_attempts: 5,
            retry_backoff_ms: 10,
            error_requeue_secs: 10,
            resync_secs: None,
        }
    }
}

impl ControllerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn resync(&self) -> Option<Duration> {
        self.resync_secs.map(Duration::from_secs)
    }
}
