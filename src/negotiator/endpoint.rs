//! rustls server configuration for an endpoint.

use std::sync::Arc;

use rustls::ServerConfig;

use crate::keystore::Identity;
use crate::policy::{AnchoredClientVerifier, AuthMode, PolicyDecision};
use crate::{ALPN_HTTP11, Error, Result};

/// Build the TLS 1.3 server configuration for `decision`.
///
/// Mutual mode installs [`AnchoredClientVerifier`]; server-auth mode asks for
/// no client certificate.
pub(crate) fn server_config(decision: &PolicyDecision, identity: &Identity) -> Result<Arc<ServerConfig>> {
    let builder = ServerConfig::builder_with_provider(crate::crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?;

    let builder = match decision.mode() {
        AuthMode::Mutual => {
            let anchors = decision.trust_anchors().cloned().ok_or_else(|| {
                Error::Config("mutual TLS requires trust anchors".to_string())
            })?;
            let verifier = AnchoredClientVerifier::new(anchors, decision.client_names().to_vec());
            builder.with_client_cert_verifier(Arc::new(verifier))
        }
        AuthMode::ServerAuth => builder.with_no_client_auth(),
        AuthMode::Plaintext => {
            return Err(Error::Internal("no TLS config for a plaintext endpoint".to_string()));
        }
    };

    let mut config = builder
        .with_single_cert(identity.chain_der(), identity.private_key())
        .map_err(|e| Error::Config(format!("Server identity rejected by TLS stack: {e}")))?;
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(Arc::new(config))
}
