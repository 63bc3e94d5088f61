//! reversepf library
//!
//! A reverse port-forward for Kubernetes: the remote agent runs inside the
//! cluster and accepts service traffic, the local agent runs on the
//! developer's machine next to the target service, and the two meet over a
//! Kubernetes API port-forward so the laptop needs no inbound connectivity.

pub mod commands;
pub mod error;
pub mod k8s;
pub mod local;
pub mod protocol;
pub mod proxy;
pub mod remote;
pub mod util;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Application name, used for resource names, labels, and DNS targets.
pub const APP_NAME: &str = "reversepf";

/// reversepf - Makes a local port accessible from inside a remote Kubernetes cluster
#[derive(Parser, Debug)]
#[command(name = "reversepf")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the remote agent to a cluster and run the local agent against it
    K8s(commands::k8s::K8sArgs),

    /// Run the remote agent (service, portal, and control server)
    Remote(commands::remote::RemoteArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::K8s(args) => commands::k8s::run(args).await,
            Commands::Remote(args) => commands::remote::run(args).await,
        }
    }
}
