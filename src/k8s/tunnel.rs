//! Kubernetes API port-forward tunnel
//!
//! Makes the remote agent's control-server and portal ports appear on
//! loopback with identical numbers, so the local agent dials them as if the
//! remote agent were local. The tunnel runs forever: each iteration discovers
//! the running pod, binds the loopback listeners, signals readiness, and
//! forwards every accepted connection through a pod port-forward stream. Any
//! failure tears the iteration down and, after a fixed delay, readiness runs
//! again, since pod identity may change across restarts.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How often to poll for a running pod.
const POD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait before rebuilding a failed tunnel.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Forwards the control-server and portal ports to the remote agent's pod.
pub struct Tunnel {
    client: Client,
    namespace: String,
    control_server_port: u16,
    portal_port: u16,
}

impl Tunnel {
    /// Create a tunnel for a run's namespace and port pair.
    pub fn new(
        client: Client,
        namespace: String,
        control_server_port: u16,
        portal_port: u16,
    ) -> Self {
        Self {
            client,
            namespace,
            control_server_port,
            portal_port,
        }
    }

    /// Run the tunnel forever. A unit is sent on `ready_tx` every time a
    /// fresh forward is in place.
    pub async fn run(self, ready_tx: mpsc::Sender<()>) {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        loop {
            let pod = wait_for_running_pod(&pods).await;
            if let Err(e) = self.forward(&pods, &pod, &ready_tx).await {
                warn!(error = %e, "port-forward tunnel failed, recreating");
            }
            sleep(RETRY_DELAY).await;
        }
    }

    /// One tunnel iteration: bind both loopback listeners, signal readiness,
    /// and forward accepted connections until something fails.
    async fn forward(
        &self,
        pods: &Api<Pod>,
        pod: &str,
        ready_tx: &mpsc::Sender<()>,
    ) -> Result<()> {
        let control = TcpListener::bind(("127.0.0.1", self.control_server_port)).await?;
        let portal = TcpListener::bind(("127.0.0.1", self.portal_port)).await?;
        info!(
            pod = %pod,
            control_server_port = self.control_server_port,
            portal_port = self.portal_port,
            "port-forward tunnel established"
        );
        let _ = ready_tx.send(()).await;

        loop {
            let (conn, port) = tokio::select! {
                accepted = control.accept() => (accepted?.0, self.control_server_port),
                accepted = portal.accept() => (accepted?.0, self.portal_port),
            };

            let mut forwarder = pods.portforward(pod, &[port]).await?;
            let upstream = forwarder
                .take_stream(port)
                .ok_or_else(|| Error::tunnel(format!("no stream for port {port}")))?;

            tokio::spawn(async move {
                let mut conn = conn;
                let mut upstream = upstream;
                match tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
                    Ok((sent, received)) => {
                        debug!(port, sent, received, "tunnel connection closed");
                    }
                    Err(e) => debug!(port, error = %e, "tunnel connection error"),
                }
                // The forwarder owns the API connection; keep it alive until
                // the copy ends.
                drop(forwarder);
            });
        }
    }
}

/// Poll the namespace until some pod reports phase `Running`, and return its
/// name. Re-runnable: a later call may pick a different pod.
async fn wait_for_running_pod(pods: &Api<Pod>) -> String {
    info!("waiting for the remote pod");
    loop {
        match pods.list(&ListParams::default()).await {
            Ok(list) => {
                for pod in &list.items {
                    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
                    if phase == Some("Running") {
                        if let Some(name) = pod.metadata.name.clone() {
                            info!(pod = %name, "pod is running");
                            return name;
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "error listing pods"),
        }
        sleep(POD_POLL_INTERVAL).await;
        info!("pod not ready yet");
    }
}
