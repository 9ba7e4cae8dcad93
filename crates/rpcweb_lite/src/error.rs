use thiserror::Error;

/// Errors that can occur while parsing RPC method paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PathError {
    #[error("invalid method path: {0}")]
    Invalid(String),
}

/// Errors that can occur while building or installing service descriptors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A handler was bound for a method the service never declared.
    #[error("service '{service}' has no declared method '{method}'")]
    UnknownMethod { service: String, method: String },

    /// Failed to parse a method path during installation.
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Errors that can occur while managing the server transport lifecycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Failed to bind the listen socket.
    #[error("failed to bind {addr}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The serve task panicked or was aborted.
    #[error("serve task failed: {0}")]
    Serve(String),
}
