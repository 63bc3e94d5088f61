//! Portal listener
//!
//! Accepts back-channel TCP connections originated by the local agent and
//! hands them out in acceptance order. The hand-off channel is bounded at
//! one connection, so acceptance throttles itself to the pace of the
//! consumer.

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::Result;

/// Listener for back-channel connections from the local agent.
pub struct Portal {
    listener: TcpListener,
    connections: mpsc::Sender<TcpStream>,
}

/// Consumer side of the portal rendezvous.
pub struct PortalConnections {
    connections: mpsc::Receiver<TcpStream>,
}

impl Portal {
    /// Bind the portal port. Bind failure is fatal for the remote agent.
    pub async fn bind(port: u16) -> Result<(Self, PortalConnections)> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let (tx, rx) = mpsc::channel(1);
        Ok((
            Self {
                listener,
                connections: tx,
            },
            PortalConnections { connections: rx },
        ))
    }

    /// Port the listener is bound to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept portal connections forever. Accept errors are logged and the
    /// listener keeps going.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "portal ready to accept connection"),
            Err(_) => info!("portal ready to accept connection"),
        }
        loop {
            let (conn, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "error accepting portal connection");
                    continue;
                }
            };
            info!(%peer, "received new portal connection request");
            if self.connections.send(conn).await.is_err() {
                // Consumer is gone; nothing left to pair with.
                return;
            }
        }
    }
}

impl PortalConnections {
    /// Wait for the next portal connection, in acceptance order.
    pub async fn take(&mut self) -> Option<TcpStream> {
        self.connections.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    #[tokio::test]
    async fn hands_out_connections_in_acceptance_order() {
        let (portal, mut connections) = Portal::bind(0).await.unwrap();
        let port = portal.local_port().unwrap();
        tokio::spawn(portal.run());

        let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        first.write_all(b"1").await.unwrap();
        let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        second.write_all(b"2").await.unwrap();

        let mut buf = [0u8; 1];
        let mut taken = timeout(Duration::from_secs(5), connections.take())
            .await
            .unwrap()
            .unwrap();
        taken.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"1");

        let mut taken = timeout(Duration::from_secs(5), connections.take())
            .await
            .unwrap()
            .unwrap();
        taken.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"2");
    }
}
