//! Control server
//!
//! Owns the single persistent control channel between the remote agent and
//! the local agent. The server is either *idle* (no channel) or *bound*
//! (exactly one channel); a second connector is told off with a short banner
//! and disconnected without disturbing the incumbent.
//!
//! While bound, two tasks cooperate on the connection: a reader that consumes
//! newline-delimited bytes from the local side, and a writer that drains the
//! outbound queue. Reader exit is the single signal that returns the server
//! to idle.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::Command;

/// Banner written to a surplus control connection before it is closed.
pub const REJECT_BANNER: &str =
    "Client connection already established. Only one client can be connected at a time";

type Slot = Arc<RwLock<Option<mpsc::Sender<Vec<u8>>>>>;

/// Listener owning the control-channel slot.
pub struct ControlServer {
    listener: TcpListener,
    slot: Slot,
}

/// Cloneable capability to send commands over the active control channel.
#[derive(Clone)]
pub struct ControlHandle {
    slot: Slot,
}

impl ControlServer {
    /// Bind the control port. Bind failure is fatal for the remote agent.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self {
            listener,
            slot: Arc::new(RwLock::new(None)),
        })
    }

    /// Port the listener is bound to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Handle for sending commands to the connected local agent.
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            slot: self.slot.clone(),
        }
    }

    /// Accept control connections forever.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "control server ready to accept connection"),
            Err(_) => info!("control server ready to accept connection"),
        }
        loop {
            let (conn, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "error accepting control connection");
                    continue;
                }
            };
            info!(%peer, "received new control connection request");

            if self.slot.read().await.is_some() {
                reject(conn).await;
                continue;
            }

            let mut guard = self.slot.write().await;
            // A collapsing reader may have raced the read check above.
            if guard.is_some() {
                drop(guard);
                reject(conn).await;
                continue;
            }

            let (to_local_tx, to_local_rx) = mpsc::channel::<Vec<u8>>(1);
            *guard = Some(to_local_tx.clone());
            drop(guard);

            let (read_half, write_half) = conn.into_split();
            tokio::spawn(read_loop(read_half, self.slot.clone(), to_local_tx));
            tokio::spawn(write_loop(to_local_rx, write_half));
        }
    }
}

impl ControlHandle {
    /// Send a command to the local agent.
    ///
    /// Fails with [`Error::NotConnected`] while no control channel is bound.
    /// Enqueueing blocks while the writer is not draining; that is the
    /// intended backpressure.
    pub async fn send(&self, command: Command) -> Result<()> {
        let sender = self.slot.read().await.clone();
        let Some(sender) = sender else {
            return Err(Error::NotConnected);
        };
        sender
            .send(command.to_bytes()?)
            .await
            .map_err(|_| Error::NotConnected)
    }
}

async fn reject(mut conn: TcpStream) {
    let _ = conn.write_all(REJECT_BANNER.as_bytes()).await;
    let _ = conn.shutdown().await;
}

/// Reads newline-delimited bytes from the local side until EOF or error,
/// then collapses the slot back to idle.
async fn read_loop(read_half: OwnedReadHalf, slot: Slot, sender: mpsc::Sender<Vec<u8>>) {
    info!("control message handler started");
    let mut lines = BufReader::new(read_half).split(b'\n');
    loop {
        match lines.next_segment().await {
            // Nothing consumes these today; they only prove the peer is alive.
            Ok(Some(line)) => debug!(len = line.len(), "message from local"),
            Ok(None) => {
                info!("control channel closed by peer");
                break;
            }
            Err(e) => {
                info!(error = %e, "control channel read failed");
                break;
            }
        }
    }

    let mut guard = slot.write().await;
    if guard
        .as_ref()
        .is_some_and(|current| current.same_channel(&sender))
    {
        *guard = None;
    }
    drop(guard);
    info!("control message handler terminated");
}

/// Writes queued payloads verbatim to the local side, preserving send order.
async fn write_loop(mut to_local: mpsc::Receiver<Vec<u8>>, mut write_half: OwnedWriteHalf) {
    while let Some(payload) = to_local.recv().await {
        if let Err(e) = write_half.write_all(&payload).await {
            warn!(error = %e, "control channel write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::{sleep, timeout};

    async fn bound_server() -> (u16, ControlHandle) {
        let server = ControlServer::bind(0).await.unwrap();
        let port = server.local_port().unwrap();
        let handle = server.handle();
        tokio::spawn(server.run());
        (port, handle)
    }

    /// Retry until the server has registered the client connection.
    async fn wait_until_bound(handle: &ControlHandle) {
        timeout(Duration::from_secs(5), async {
            while handle.send(Command::init()).await.is_err() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("control channel should bind");
    }

    #[tokio::test]
    async fn send_fails_while_idle() {
        let (_port, handle) = bound_server().await;
        assert!(matches!(
            handle.send(Command::init()).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn delivers_commands_to_the_connected_client() {
        let (port, handle) = bound_server().await;
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wait_until_bound(&handle).await;

        let mut buf = vec![0u8; 10];
        timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"{\"type\":0}");
    }

    #[tokio::test]
    async fn rejects_a_second_client_with_a_banner() {
        let (port, handle) = bound_server().await;
        let _incumbent = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wait_until_bound(&handle).await;

        let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut banner = String::new();
        timeout(Duration::from_secs(5), second.read_to_string(&mut banner))
            .await
            .unwrap()
            .unwrap();
        assert!(banner.contains("already established"));

        // The incumbent is undisturbed.
        assert!(handle.send(Command::init()).await.is_ok());
    }

    #[tokio::test]
    async fn returns_to_idle_when_the_client_disconnects() {
        let (port, handle) = bound_server().await;
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wait_until_bound(&handle).await;

        drop(client);
        timeout(Duration::from_secs(5), async {
            loop {
                if matches!(
                    handle.send(Command::init()).await,
                    Err(Error::NotConnected)
                ) {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server should notice the disconnect");

        // A new client can bind again.
        let _client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wait_until_bound(&handle).await;
    }
}
