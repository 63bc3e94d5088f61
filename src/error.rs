//! Error types for reversepf

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// reversepf errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("codec error: {0}")]
    Codec(#[source] serde_json::Error),

    #[error("client not connected yet")]
    NotConnected,

    #[error("manifest error: {message}")]
    Manifest { message: String },

    #[error("tunnel error: {message}")]
    Tunnel { message: String },
}

impl Error {
    pub fn manifest(message: impl Into<String>) -> Self {
        Error::Manifest {
            message: message.into(),
        }
    }

    pub fn tunnel(message: impl Into<String>) -> Self {
        Error::Tunnel {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_display() {
        assert_eq!(Error::NotConnected.to_string(), "client not connected yet");
    }

    #[test]
    fn test_manifest_error_display() {
        let err = Error::manifest("missing apiVersion");
        assert_eq!(err.to_string(), "manifest error: missing apiVersion");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use").into();
        assert!(err.to_string().contains("in use"));
    }
}
