//! Service listener
//!
//! Accepts cluster-side traffic. Each accepted connection triggers an INIT on
//! the control channel and is then paired with the next portal connection;
//! pairing blocks the accept loop, so INITs are processed strictly in order
//! and at most one is outstanding at a time.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::protocol::Command;
use crate::proxy::splice;

use super::control_server::ControlHandle;
use super::portal::PortalConnections;

/// Banner written to a service connection when no local agent is connected.
pub const NOT_READY_BANNER: &str = "Local component not ready. Please retry.";

/// Listener for cluster-side service traffic.
pub struct ServiceListener {
    listener: TcpListener,
}

impl ServiceListener {
    /// Bind the service port. Bind failure is fatal for the remote agent.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self { listener })
    }

    /// Port the listener is bound to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept service connections forever, pairing each with a portal
    /// connection and splicing the two.
    pub async fn run(self, control: ControlHandle, mut portal: PortalConnections) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "service ready to accept connections"),
            Err(_) => info!("service ready to accept connections"),
        }
        loop {
            let (mut conn, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "error accepting service connection");
                    continue;
                }
            };
            info!(%peer, "received new service connection request");

            if let Err(e) = control.send(Command::init()).await {
                warn!(error = %e, "unable to signal the local agent");
                let _ = conn.write_all(NOT_READY_BANNER.as_bytes()).await;
                let _ = conn.shutdown().await;
                continue;
            }

            let Some(portal_conn) = portal.take().await else {
                error!("portal listener stopped, shutting down service listener");
                return;
            };

            let portal_peer = portal_conn.peer_addr().ok();
            tokio::spawn(async move {
                info!(service = %peer, portal = ?portal_peer, "new proxy established");
                splice(conn, portal_conn).await;
                info!(service = %peer, "stopping proxy");
            });
        }
    }
}
