//! Error types for connection, acceptor, server and client setup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("reactor error")]
    Reactor(#[from] fluxio_core::ReactorError),

    #[error("failed to bind listener on {addr}")]
    ListenerBind { addr: String, #[source] source: std::io::Error },

    #[error("malformed address {0:?}")]
    MalformedAddress(String),

    #[error("failed to install signal handler")]
    SignalSetup(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
