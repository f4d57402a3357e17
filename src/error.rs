//! Error types for the TLS gateway

use std::io;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::keystore::KeyStoreError;
use crate::negotiator::HandshakeError;

/// Result type alias for the TLS gateway
pub type Result<T> = std::result::Result<T, Error>;

/// TLS gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity or trust store could not be loaded
    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// Handshake rejected (scoped to one connection)
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Post-handshake channel failure (scoped to one channel)
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// rustls refused a configuration
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error belongs to the configuration family.
    ///
    /// Configuration errors are fatal at startup: the listener must not
    /// begin accepting connections.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::KeyStore(_) | Self::Tls(_))
    }
}
