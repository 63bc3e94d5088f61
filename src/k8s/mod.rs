//! Kubernetes control plane: manifest rendering, server-side apply, and the
//! API port-forward tunnel.

pub mod deployer;
pub mod manifests;
pub mod tunnel;

pub use deployer::Deployer;
pub use manifests::RunConfig;
pub use tunnel::Tunnel;
