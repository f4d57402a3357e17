//! rustls verifiers backed by [`validate_chain`].

use std::iter;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, OtherError, SignatureScheme};
use tracing::debug;

use super::chain::{ChainRejection, RejectReason, Verdict, validate_chain};
use super::names::ExpectedName;
use crate::keystore::TrustAnchorSet;

/// Translate a verdict into the error rustls turns into an alert.
///
/// Expiry maps onto rustls' own error so the peer receives
/// `certificate_expired`; everything else travels as [`ChainRejection`]
/// and produces `handshake_failure`.
fn into_rustls(verdict: Verdict) -> Result<(), rustls::Error> {
    match verdict {
        Verdict::Accepted => Ok(()),
        Verdict::Rejected(RejectReason::Expired) => {
            Err(rustls::Error::InvalidCertificate(CertificateError::Expired))
        }
        Verdict::Rejected(reason) => Err(rustls::Error::Other(OtherError(Arc::new(ChainRejection(reason))))),
    }
}

fn leaf_first<'a>(
    end_entity: &CertificateDer<'a>,
    intermediates: &[CertificateDer<'a>],
) -> Vec<CertificateDer<'a>> {
    iter::once(end_entity.clone()).chain(intermediates.iter().cloned()).collect()
}

/// Server-side verifier for client certificates.
///
/// Always requests and requires a client certificate; the CA subjects of the
/// anchor set are offered as hints.
#[derive(Debug)]
pub struct AnchoredClientVerifier {
    anchors: Arc<TrustAnchorSet>,
    client_names: Vec<ExpectedName>,
    root_hints: Vec<DistinguishedName>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl AnchoredClientVerifier {
    /// Verifier over `anchors`, optionally binding clients to `client_names`.
    pub fn new(anchors: Arc<TrustAnchorSet>, client_names: Vec<ExpectedName>) -> Self {
        let root_hints = anchors.root_hint_subjects();
        Self {
            anchors,
            client_names,
            root_hints,
            algorithms: crate::crypto_provider().signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for AnchoredClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.root_hints
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let chain = leaf_first(end_entity, intermediates);
        let verdict = validate_chain(&chain, &self.anchors, now, &self.client_names);
        debug!(verdict = ?verdict, chain_len = chain.len(), "Client chain validated");
        into_rustls(verdict).map(|()| ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Client-side verifier for server certificates.
///
/// Adds the SAN check against the name the client dialled unless hostname
/// verification is switched off.
#[derive(Debug)]
pub struct AnchoredServerVerifier {
    anchors: Arc<TrustAnchorSet>,
    verify_hostname: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl AnchoredServerVerifier {
    /// Verifier over `anchors`.
    pub fn new(anchors: Arc<TrustAnchorSet>, verify_hostname: bool) -> Self {
        Self {
            anchors,
            verify_hostname,
            algorithms: crate::crypto_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AnchoredServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let expected: Vec<ExpectedName> = if self.verify_hostname {
            ExpectedName::from_server_name(server_name).into_iter().collect()
        } else {
            Vec::new()
        };
        let chain = leaf_first(end_entity, intermediates);
        let verdict = validate_chain(&chain, &self.anchors, now, &expected);
        debug!(verdict = ?verdict, server_name = ?server_name, "Server chain validated");
        into_rustls(verdict).map(|()| ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
