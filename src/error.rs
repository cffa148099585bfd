//! Error types for netpipe

use thiserror::Error;

/// Main error type for netpipe
///
/// Variants fall into two classes. Validation errors are raised while an
/// address is being resolved into a strategy, before any socket exists.
/// Everything else is a runtime failure of an already constructed endpoint.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("No transport accepts address tag '{0}'")]
    UnsupportedAddress(String),

    #[error("Listener is not listening")]
    NotListening,

    #[error("Listener already handed out its session")]
    AlreadyAccepted,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// True for failures detected while resolving an address, before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidAddress(_)
                | Error::InvalidPort(_)
                | Error::UnsupportedAddress(_)
        )
    }
}

/// Result type alias for netpipe
pub type Result<T> = std::result::Result<T, Error>;
