//! Error types for nio

use thiserror::Error;

/// Main error type for nio
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    #[error("cannot remove read stage: invalid index {0}")]
    InvalidIndex(usize),

    #[error("cannot remove read stage: there must be at least one stage in the chain")]
    EmptyChain,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Read loop already started")]
    ReaderTaken,

    #[error("Write queue is full")]
    QueueFull,

    #[error("Operation would block")]
    WouldBlock,

    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// Returns `true` for errors that mean the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(err) => is_disconnect(err),
            Error::ChannelClosed => true,
            _ => false,
        }
    }
}

/// Classifies raw I/O errors that end a connection rather than a single operation.
pub(crate) fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::WriteZero
    )
}

/// Result type alias for nio
pub type Result<T> = std::result::Result<T, Error>;
