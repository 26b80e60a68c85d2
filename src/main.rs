// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use appservice_controller::appservice_types::AppService;
use appservice_controller::config::ControllerConfig;
use appservice_controller::shim_layer::run_controller;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "appservice-controller",
    version,
    about = "Keeps a Deployment and a NodePort Service in line with each AppService"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the AppService custom resource definition as YAML
    Export,
    /// Run the controller against the current kubeconfig context
    Run(ControllerConfig),
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Export => {
            info!("exporting custom resource definition");
            println!("{}", serde_yaml::to_string(&AppService::crd())?);
        }
        Command::Run(config) => {
            info!("running appservice-controller with {:?}", config);
            run_controller(config).await?;
        }
    }
    Ok(())
}
