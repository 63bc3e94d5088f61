//! k8s command - deploy the remote agent and run the local agent
//!
//! Projects the remote agent onto the cluster (Namespace, Deployment,
//! Service), keeps a Kubernetes API port-forward to it, prints the cluster
//! DNS target whenever the tunnel is ready, and runs the local agent in the
//! same process. Interrupt deletes the run namespace and exits cleanly.

use std::path::PathBuf;

use clap::Args;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::Result;
use crate::k8s::{Deployer, RunConfig, Tunnel};
use crate::local::LocalAgent;
use crate::util;

/// Deploy the remote agent to a cluster and run the local agent against it
#[derive(Args, Debug)]
pub struct K8sArgs {
    /// Local port to be forwarded
    #[arg(short = 'l', long)]
    pub local_port: u16,

    /// The portal port in the remote agent. Defaults to an OS-assigned port
    #[arg(short = 'p', long)]
    pub portal_port: Option<u16>,

    /// The port on which the control server listens. Defaults to an OS-assigned port
    #[arg(short = 'c', long)]
    pub control_server_port: Option<u16>,

    /// The port on which the service is exposed. Defaults to the local port
    #[arg(short = 's', long)]
    pub service_port: Option<u16>,

    /// The name of this run. Reuse a name to replace an older instance
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Path to the kubeconfig file to use for requests
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// The name of the kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Remote agent container image
    #[arg(
        long,
        env = "REVERSEPF_IMAGE",
        default_value = concat!("ghcr.io/reversepf/reversepf:", env!("CARGO_PKG_VERSION"))
    )]
    pub image: String,
}

pub async fn run(args: K8sArgs) -> Result<()> {
    let service_port = args.service_port.unwrap_or(args.local_port);
    let ephemeral = util::random_open_ports(2)?;
    let control_server_port = args.control_server_port.unwrap_or(ephemeral[0]);
    let portal_port = args.portal_port.unwrap_or(ephemeral[1]);
    let name = args.name.clone().unwrap_or_else(util::random_name);

    let config = RunConfig::new(
        &name,
        &args.image,
        control_server_port,
        portal_port,
        service_port,
    );
    info!(
        local_port = args.local_port,
        service_port,
        portal_port,
        control_server_port,
        name = %name,
        "initializing service"
    );

    let kubeconfig = args.kubeconfig.clone().or_else(util::default_kubeconfig_path);
    let deployer = Deployer::new(kubeconfig.as_deref(), args.context.as_deref()).await?;

    let cleaner = deployer.clone();
    let namespace = config.namespace.clone();
    tokio::select! {
        result = run_session(args.local_port, deployer, config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            cleaner.cleanup(&namespace).await;
            Ok(())
        }
    }
}

/// Deploy, start the tunnel and the ready banner, and run the local agent.
/// Returns only when deployment fails; the agent itself runs forever.
async fn run_session(local_port: u16, deployer: Deployer, config: RunConfig) -> Result<()> {
    deployer.deploy_remote_components(&config).await?;

    let (ready_tx, mut ready_rx) = mpsc::channel(1);
    let tunnel = Tunnel::new(
        deployer.client(),
        config.namespace.clone(),
        config.control_server_port,
        config.portal_port,
    );
    tokio::spawn(tunnel.run(ready_tx));

    let target = config.dns_target();
    tokio::spawn(async move {
        while ready_rx.recv().await.is_some() {
            println!("{}", util::connection_banner(&target));
        }
    });

    LocalAgent::new(local_port, config.portal_port, config.control_server_port)
        .run()
        .await;
    Ok(())
}
