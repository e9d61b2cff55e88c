//! Error types for the transport shim

use std::io;
use thiserror::Error;

/// Result type for shim operations
pub type Result<T> = std::result::Result<T, ShimError>;

/// Errors raised by the shim itself
#[derive(Debug, Error)]
pub enum ShimError {
    /// The proxy could not be reached (connect, DNS or TLS handshake failure)
    #[error("Proxy unavailable at {url}: {message}")]
    ProxyUnavailable {
        /// Control endpoint that was called
        url: String,
        /// Underlying failure
        message: String,
    },

    /// The proxy answered, but not the way the protocol requires
    #[error("Proxy protocol error: {0}")]
    ProxyProtocol(String),

    /// Session API misuse (send before start, stop before start, double start)
    #[error("Session state error: {0}")]
    SessionState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request cannot be redirected through the proxy
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Error returned by a redirecting transport
///
/// Failures of the wrapped transport are carried unchanged in `Upstream`.
#[derive(Debug, Error)]
pub enum InterceptError<E> {
    /// The request could not be rewritten for the proxy
    #[error(transparent)]
    Redirect(#[from] ShimError),

    /// Error from the wrapped transport
    #[error(transparent)]
    Upstream(E),
}

impl<E> InterceptError<E> {
    /// Returns the wrapped transport's error, if that is what failed
    pub fn into_upstream(self) -> Option<E> {
        match self {
            Self::Upstream(e) => Some(e),
            Self::Redirect(_) => None,
        }
    }
}
