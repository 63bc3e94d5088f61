//! Small helpers shared by the CLI commands

use std::io;
use std::net::TcpListener;
use std::path::PathBuf;

use rand::Rng;

/// Draw `count` distinct OS-assigned TCP ports.
///
/// All listeners are held until every port has been read back, so the same
/// port is never handed out twice in one call.
pub fn random_open_ports(count: usize) -> io::Result<Vec<u16>> {
    let mut listeners = Vec::with_capacity(count);
    let mut ports = Vec::with_capacity(count);
    for _ in 0..count {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        ports.push(listener.local_addr()?.port());
        listeners.push(listener);
    }
    Ok(ports)
}

/// Generate a run name of eight lowercase alphanumerics.
pub fn random_name() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// The kubeconfig at the standard home path, if it exists.
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".kube").join("config");
    path.exists().then_some(path)
}

/// Render the connection-details banner shown when the tunnel is ready.
pub fn connection_banner(target: &str) -> String {
    let width = target.len() + 4;
    let horizontal = "─".repeat(width);
    let pad = " ".repeat(width);
    format!("┌{horizontal}┐\n│{pad}│\n│  {target}  │\n│{pad}│\n└{horizontal}┘")
}
