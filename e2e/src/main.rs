// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod appservice_e2e;
pub mod common;

use appservice_e2e::appservice_e2e_test;
use clap::{Parser, ValueEnum};
use common::Error;
use tracing::*;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Suite {
    Appservice,
}

#[derive(Parser, Debug)]
#[command(
    name = "appservice-e2e",
    about = "End-to-end tests against a live cluster"
)]
struct Cli {
    #[arg(value_enum)]
    suite: Suite,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();
    match Cli::parse().suite {
        Suite::Appservice => {
            info!("Running appservice end-to-end test");
            appservice_e2e_test().await
        }
    }
}
