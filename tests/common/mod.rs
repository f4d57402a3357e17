//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    date_time_ymd,
};
use rustls::ClientConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tls_gateway::config::TlsConfig;
use tls_gateway::connector::Connector;
use tls_gateway::keystore::{self, Identity, TrustAnchorSet};
use tls_gateway::negotiator::{Negotiator, PhaseTimeouts};
use tls_gateway::policy::{self, AnchoredServerVerifier};

/// A certificate authority that issues test leaves.
pub struct Pki {
    pub ca_pem: String,
    issuer: Issuer<'static, KeyPair>,
}

impl Pki {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self {
            ca_pem: cert.pem(),
            issuer: Issuer::new(params, key),
        }
    }

    fn issue(&self, cn: &str, names: &[&str], expired: bool) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>())
                .unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        if expired {
            params.not_before = date_time_ymd(2020, 1, 1);
            params.not_after = date_time_ymd(2021, 1, 1);
        }
        let cert = params.signed_by(&key, &self.issuer).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    /// PEM bundle `cert + key` for a valid leaf.
    pub fn leaf_bundle(&self, cn: &str, names: &[&str]) -> String {
        let (cert, key) = self.issue(cn, names, false);
        format!("{cert}{key}")
    }

    /// PEM bundle `cert + key` for a leaf that expired in 2021.
    pub fn expired_bundle(&self, cn: &str, names: &[&str]) -> String {
        let (cert, key) = self.issue(cn, names, true);
        format!("{cert}{key}")
    }

    /// PEM bundle with the key encrypted under `password`.
    pub fn encrypted_bundle(&self, cn: &str, names: &[&str], password: &str) -> String {
        let (cert, key) = self.issue(cn, names, false);
        format!("{cert}{}", encrypt_key_pem(&key, password))
    }

    /// Leaf chain and key as rustls types, for driving a raw client.
    pub fn leaf_der(&self, cn: &str, names: &[&str]) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>())
                .unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        let cert = params.signed_by(&key, &self.issuer).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        (vec![cert.der().clone()], key)
    }

    pub fn identity(&self, cn: &str, names: &[&str]) -> Identity {
        keystore::load_identity(self.leaf_bundle(cn, names).as_bytes(), None).unwrap()
    }

    pub fn anchors(&self) -> Arc<TrustAnchorSet> {
        Arc::new(keystore::load_trust_anchors(self.ca_pem.as_bytes(), None).unwrap())
    }
}

/// Re-encode a PKCS#8 key as `ENCRYPTED PRIVATE KEY`.
pub fn encrypt_key_pem(key_pem: &str, password: &str) -> String {
    let key = KeyPair::from_pem(key_pem).unwrap();
    let der = key.serialize_der();
    let info = pkcs8::PrivateKeyInfo::try_from(der.as_slice()).unwrap();
    let params =
        pkcs8::pkcs5::pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &[3u8; 16], &[5u8; 16])
            .unwrap();
    info.encrypt_with_params(params, password)
        .unwrap()
        .to_pem("ENCRYPTED PRIVATE KEY", pkcs8::LineEnding::LF)
        .unwrap()
        .to_string()
}

/// Server and client PKIs plus the server identity.
pub struct Setup {
    pub server_pki: Pki,
    pub client_pki: Pki,
    pub server_identity: Identity,
}

impl Setup {
    pub fn new() -> Self {
        let server_pki = Pki::new("Gateway Server CA");
        let client_pki = Pki::new("Gateway Client CA");
        let server_identity = server_pki.identity("gateway", &["localhost", "127.0.0.1"]);
        Self {
            server_pki,
            client_pki,
            server_identity,
        }
    }

    pub fn negotiator(&self, enabled: bool, client_auth_required: bool, timeouts: PhaseTimeouts) -> Negotiator {
        let config = TlsConfig {
            enabled,
            client_auth_required,
            ..TlsConfig::default()
        };
        let anchors = client_auth_required.then(|| self.client_pki.anchors());
        let decision = policy::decide(&config, anchors).unwrap();
        Negotiator::new(decision, Some(&self.server_identity), timeouts).unwrap()
    }

    pub fn mutual(&self) -> Negotiator {
        self.negotiator(true, true, fast_timeouts())
    }

    pub fn server_auth(&self) -> Negotiator {
        self.negotiator(true, false, fast_timeouts())
    }

    /// A client trusting the server CA, optionally presenting `identity`.
    pub fn connector(&self, identity: Option<&Identity>) -> Connector {
        Connector::new(self.server_pki.anchors(), identity, true).unwrap()
    }

    /// A rustls client config trusting the server CA, for hand-driven handshakes.
    pub fn client_config(&self, client_cn: Option<&str>) -> ClientConfig {
        let verifier = Arc::new(AnchoredServerVerifier::new(self.server_pki.anchors(), true));
        let builder = ClientConfig::builder_with_provider(tls_gateway::crypto_provider())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(verifier);
        match client_cn {
            Some(cn) => {
                let (chain, key) = self.client_pki.leaf_der(cn, &["client.local"]);
                builder.with_client_auth_cert(chain, key).unwrap()
            }
            None => builder.with_no_client_auth(),
        }
    }

    pub fn client_identity(&self, cn: &str) -> Identity {
        self.client_pki.identity(cn, &["client.local"])
    }
}

pub fn fast_timeouts() -> PhaseTimeouts {
    PhaseTimeouts {
        client_hello: Duration::from_secs(5),
        client_certificate: Duration::from_secs(5),
        key_exchange: Duration::from_secs(5),
    }
}
