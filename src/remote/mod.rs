//! Remote agent
//!
//! The in-cluster half of the reverse port-forward: a service listener facing
//! the cluster, a portal listener facing the local agent's back-channel
//! connections, and a control server carrying the persistent control channel.

pub mod control_server;
pub mod portal;
pub mod service;

pub use control_server::{ControlHandle, ControlServer, REJECT_BANNER};
pub use portal::{Portal, PortalConnections};
pub use service::{ServiceListener, NOT_READY_BANNER};

use crate::error::Result;

/// The remote agent: binds all three listeners and runs them.
pub struct RemoteAgent {
    service_port: u16,
    control_server_port: u16,
    portal_port: u16,
}

impl RemoteAgent {
    /// Create a remote agent for the given ports.
    pub fn new(service_port: u16, control_server_port: u16, portal_port: u16) -> Self {
        Self {
            service_port,
            control_server_port,
            portal_port,
        }
    }

    /// Bind and run the three listeners. Any bind failure aborts startup.
    pub async fn run(self) -> Result<()> {
        let (portal, connections) = Portal::bind(self.portal_port).await?;
        let control = ControlServer::bind(self.control_server_port).await?;
        let service = ServiceListener::bind(self.service_port).await?;

        let handle = control.handle();
        tokio::spawn(portal.run());
        tokio::spawn(control.run());
        service.run(handle, connections).await;
        Ok(())
    }
}
