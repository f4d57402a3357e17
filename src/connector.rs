//! Client role: connect to a gateway and verify its certificate.

use std::sync::Arc;

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::keystore::{Identity, TrustAnchorSet};
use crate::negotiator::{Rejection, classify_io};
use crate::policy::AnchoredServerVerifier;
use crate::{ALPN_HTTP11, Result};

/// Client-side connection failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The target name is neither a DNS name nor an IP address.
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
    /// The handshake failed.
    #[error("Handshake rejected: {0}")]
    Rejected(Rejection),
}

/// TLS client that validates servers against a trust anchor set.
#[derive(Clone)]
pub struct Connector {
    inner: TlsConnector,
}

impl Connector {
    /// Build a connector.
    ///
    /// `identity` is presented when the server requests a client
    /// certificate. With `verify_hostname` off only chain and validity are
    /// checked.
    pub fn new(
        anchors: Arc<TrustAnchorSet>,
        identity: Option<&Identity>,
        verify_hostname: bool,
    ) -> Result<Self> {
        let verifier = Arc::new(AnchoredServerVerifier::new(anchors, verify_hostname));
        let builder = ClientConfig::builder_with_provider(crate::crypto_provider())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut config = match identity {
            Some(identity) => {
                builder.with_client_auth_cert(identity.chain_der(), identity.private_key())?
            }
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

        Ok(Self {
            inner: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Run the client handshake over `io`.
    pub async fn connect<S>(&self, io: S, server_name: &str) -> std::result::Result<TlsStream<S>, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| ConnectError::InvalidServerName(server_name.to_string()))?;

        let stream = self.inner.connect(name, io).await.map_err(|e| {
            let rejection = classify_io(&e);
            debug!(server_name, error = %e, alert = rejection.name(), "Client handshake failed");
            ConnectError::Rejected(rejection)
        })?;

        debug!(
            server_name,
            cipher_suite = ?stream.get_ref().1.negotiated_cipher_suite().map(|s| s.suite()),
            "Client handshake complete"
        );
        Ok(stream)
    }
}
