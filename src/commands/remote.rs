//! remote command - run the in-cluster agent

use clap::Args;

use crate::error::Result;
use crate::remote::RemoteAgent;

/// Run the remote agent (service, portal, and control server)
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// The port on which the service is exposed
    #[arg(short = 's', long)]
    pub service_port: u16,

    /// The port on which the control server listens
    #[arg(short = 'c', long)]
    pub control_server_port: u16,

    /// The port to which the local agent connects back
    #[arg(short = 'p', long)]
    pub portal_port: u16,
}

pub async fn run(args: RemoteArgs) -> Result<()> {
    RemoteAgent::new(
        args.service_port,
        args.control_server_port,
        args.portal_port,
    )
    .run()
    .await
}
