//! Local agent
//!
//! Runs next to the target service on the developer's machine. Maintains the
//! control channel to the remote agent (through the port-forward tunnel, both
//! ports appear on loopback) and, for every INIT received, opens one portal
//! connection and splices it with a loopback connection to the local service.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, warn};

use crate::protocol::{Command, CommandCodec, CommandType};
use crate::proxy::splice;

/// How long to wait before redialing the control server.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// The local half of the reverse port-forward.
pub struct LocalAgent {
    local_port: u16,
    portal_port: u16,
    control_server_port: u16,
}

impl LocalAgent {
    /// Create a local agent targeting `local_port` on loopback.
    pub fn new(local_port: u16, portal_port: u16, control_server_port: u16) -> Self {
        Self {
            local_port,
            portal_port,
            control_server_port,
        }
    }

    /// Maintain the control channel forever.
    ///
    /// Dial failures and disconnects are retried after a fixed delay; decode
    /// errors are logged and reading continues.
    pub async fn run(self) {
        info!(
            local_port = self.local_port,
            portal_port = self.portal_port,
            control_server_port = self.control_server_port,
            "establishing control server connection"
        );
        loop {
            let stream = match TcpStream::connect(("127.0.0.1", self.control_server_port)).await {
                Ok(stream) => stream,
                Err(_) => {
                    warn!("waiting for control server to start");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            info!("established connection to control server");
            self.read_commands(stream).await;
            info!("disconnected from control server");
        }
    }

    /// Decode commands off the control channel until EOF or an I/O error.
    async fn read_commands(&self, mut stream: TcpStream) {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::with_capacity(256);
        loop {
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(command)) => self.dispatch(command),
                    Ok(None) => break,
                    Err(e) => error!(error = %e, "invalid command from remote"),
                }
            }
            match stream.read_buf(&mut buf).await {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "control channel failed");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, command: Command) {
        info!(?command, "new command received from remote");
        match command.command_type {
            CommandType::Init => {
                tokio::spawn(handle_init(self.portal_port, self.local_port));
            }
            CommandType::Unknown(tag) => debug!(tag, "ignoring unknown command"),
        }
    }
}

/// Open one portal connection and one loopback connection to the local
/// service, then splice them. If either dial fails, whatever was opened is
/// dropped and the INIT is abandoned.
async fn handle_init(portal_port: u16, local_port: u16) {
    info!(portal_port, local_port, "starting a new proxy connection");
    let portal_conn = match TcpStream::connect(("127.0.0.1", portal_port)).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "unable to connect to portal");
            return;
        }
    };
    let local_conn = match TcpStream::connect(("127.0.0.1", local_port)).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "unable to connect to local service");
            return;
        }
    };
    splice(portal_conn, local_conn).await;
    info!("proxy connection terminated");
}
