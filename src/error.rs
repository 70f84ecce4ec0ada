use thiserror::Error;

use crate::protocol::response::{ErrPayload, ErrPayloadBytes};

pub use color_eyre::eyre::eyre;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Bad usage error: {0}")]
    BadUsageError(String),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    /// A non-NULL text value could not be parsed as the requested type
    #[error("Cannot convert {value:?} to {target}: {reason}")]
    ConversionError {
        value: String,
        target: &'static str,
        reason: String,
    },

    /// An earlier transport failure left the connection in an unknown position of the byte stream
    #[error("Connection is broken by an earlier transport error")]
    ConnectionBroken,

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    /// Errors after which the connection can no longer be used
    pub fn is_conn_broken(&self) -> bool {
        matches!(
            self,
            Error::IoError(_) | Error::InvalidPacket | Error::ConnectionBroken
        )
    }
}

impl<'a> From<ErrPayloadBytes<'a>> for Error {
    fn from(value: ErrPayloadBytes<'a>) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::ServerError(err_payload),
            Err(err) => err,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
