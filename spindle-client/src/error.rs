use std::io;

use spindle_net::{ParseError, ParseErrorKind, WriteError, WriteErrorKind};
use spindle_reactor::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection to {host}:{port} failed: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("malformed status line")]
    MalformedStatusLine,
    #[error("request body supplied without content-length")]
    MissingContentLength,
    #[error("unsupported transfer-encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("connection closed before the response was complete")]
    UnexpectedEof,
    #[error("malformed response: {0}")]
    MalformedResponse(ParseError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub(crate) fn from_transport(error: TransportError, host: &str, port: u16) -> Self {
        match error {
            TransportError::Connect { host, port, source } => {
                ClientError::Connection { host, port, source }
            }
            TransportError::Io(source) => ClientError::Connection {
                host: host.to_string(),
                port,
                source,
            },
            TransportError::InvalidState(state) => ClientError::Connection {
                host: host.to_string(),
                port,
                source: io::Error::new(
                    io::ErrorKind::NotConnected,
                    format!("connection is {state:?}"),
                ),
            },
        }
    }
}

impl From<ParseError> for ClientError {
    fn from(error: ParseError) -> Self {
        match error.kind {
            ParseErrorKind::MalformedStatusLine => ClientError::MalformedStatusLine,
            ParseErrorKind::UnsupportedEncoding(coding) => ClientError::UnsupportedEncoding(coding),
            ParseErrorKind::UnexpectedEof => ClientError::UnexpectedEof,
            _ => ClientError::MalformedResponse(error),
        }
    }
}

impl From<WriteError> for ClientError {
    fn from(error: WriteError) -> Self {
        match error.kind {
            WriteErrorKind::MissingContentLength => ClientError::MissingContentLength,
            _ => ClientError::InvalidRequest(error.kind.to_string()),
        }
    }
}
