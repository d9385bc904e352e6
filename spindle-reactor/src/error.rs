use std::io;

use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("connection is {0:?}")]
    InvalidState(ConnectionState),
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
}
