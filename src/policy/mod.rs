//! Handshake Policy Engine
//!
//! Two responsibilities:
//!
//! - [`decide`]: a pure function from configuration to the endpoint's
//!   [`PolicyDecision`] (plaintext, server-auth TLS or mutual TLS).
//! - [`validate_chain`]: the trust decision for a presented certificate
//!   chain, with an enumerated [`RejectReason`] on failure.
//!
//! The rustls verifiers in [`verifier`] are thin adapters over
//! [`validate_chain`].

mod chain;
mod names;
mod signature;
pub mod verifier;

use std::fmt;
use std::sync::Arc;

pub use chain::{ChainRejection, RejectReason, Verdict, validate_chain};
pub use names::ExpectedName;
pub use verifier::{AnchoredClientVerifier, AnchoredServerVerifier};

use crate::config::TlsConfig;
use crate::keystore::TrustAnchorSet;
use crate::{Error, Result};

/// How much authentication an endpoint demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No TLS.
    Plaintext,
    /// TLS with a server certificate only.
    ServerAuth,
    /// TLS with mandatory client certificates.
    Mutual,
}

impl AuthMode {
    /// Lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "plaintext",
            Self::ServerAuth => "server-auth",
            Self::Mutual => "mutual",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-endpoint decision, computed once at startup.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    mode: AuthMode,
    trust_anchors: Option<Arc<TrustAnchorSet>>,
    client_names: Vec<ExpectedName>,
}

impl PolicyDecision {
    /// The endpoint's auth mode.
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Whether TLS is negotiated at all.
    pub fn tls_enabled(&self) -> bool {
        self.mode != AuthMode::Plaintext
    }

    /// Whether clients must present a certificate.
    pub fn client_auth_required(&self) -> bool {
        self.mode == AuthMode::Mutual
    }

    /// Anchors used to validate client chains. Always present in mutual mode.
    pub fn trust_anchors(&self) -> Option<&Arc<TrustAnchorSet>> {
        self.trust_anchors.as_ref()
    }

    /// Names a client leaf must carry; empty disables the check.
    pub fn client_names(&self) -> &[ExpectedName] {
        &self.client_names
    }
}

/// Compute the endpoint policy from configuration.
///
/// Mutual mode without anchors is a configuration error, as is an
/// unparseable entry in `client_names`.
pub fn decide(config: &TlsConfig, anchors: Option<Arc<TrustAnchorSet>>) -> Result<PolicyDecision> {
    let mode = match (config.enabled, config.client_auth_required) {
        (false, _) => AuthMode::Plaintext,
        (true, false) => AuthMode::ServerAuth,
        (true, true) => AuthMode::Mutual,
    };

    if mode == AuthMode::Mutual && anchors.as_ref().is_none_or(|a| a.is_empty()) {
        return Err(Error::Config(
            "tls.client_auth_required needs a non-empty tls.trust_anchors source".to_string(),
        ));
    }

    let client_names = config
        .client_names
        .iter()
        .map(|name| {
            ExpectedName::parse(name)
                .ok_or_else(|| Error::Config(format!("invalid entry in tls.client_names: '{name}'")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PolicyDecision {
        mode,
        trust_anchors: anchors,
        client_names,
    })
}
