//! Parsed X.509 certificate values.
//!
//! A [`Certificate`] is parsed once from DER and never mutated afterwards.
//! Everything the policy engine needs (names, validity, SANs, the signed
//! bytes and the issuer-verifiable signature) is extracted up front so the
//! DER does not have to be re-parsed on every handshake.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::oid::Oid;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use super::KeyStoreError;

// ─────────────────────────────────────────────────────────────────────────────
// Fingerprint
// ─────────────────────────────────────────────────────────────────────────────

/// SHA-256 over the DER encoding of a certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash a DER-encoded certificate.
    #[must_use]
    pub fn of(der: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(der));
        Self(out)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subject alternative names
// ─────────────────────────────────────────────────────────────────────────────

/// One Subject Alternative Name entry we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAltName {
    /// `dNSName`
    Dns(String),
    /// `iPAddress`
    Ip(IpAddr),
    /// `uniformResourceIdentifier` (e.g. SPIFFE IDs)
    Uri(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable, parsed X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    der: CertificateDer<'static>,
    fingerprint: Fingerprint,
    subject: Vec<u8>,
    subject_display: String,
    issuer: Vec<u8>,
    issuer_display: String,
    common_name: Option<String>,
    public_key_info: Vec<u8>,
    public_key: Vec<u8>,
    not_before: i64,
    not_after: i64,
    subject_alt_names: Vec<SubjectAltName>,
    is_ca: bool,
    tbs: Vec<u8>,
    signature_algorithm: Oid<'static>,
    signature: Vec<u8>,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Malformed`] if the bytes are not a single
    /// well-formed X.509 certificate.
    pub fn from_der(der: CertificateDer<'static>) -> Result<Self, KeyStoreError> {
        let mut parsed = Self::parse(der.as_ref())?;
        parsed.der = der;
        Ok(parsed)
    }

    fn parse(bytes: &[u8]) -> Result<Self, KeyStoreError> {
        let (rest, cert) = X509Certificate::from_der(bytes)
            .map_err(|e| KeyStoreError::Malformed(format!("invalid certificate: {e}")))?;
        if !rest.is_empty() {
            return Err(KeyStoreError::Malformed(
                "trailing bytes after certificate".to_string(),
            ));
        }

        let spki = cert.public_key();
        let validity = cert.validity();

        Ok(Self {
            der: CertificateDer::from(Vec::new()),
            fingerprint: Fingerprint::of(bytes),
            subject: cert.subject().as_raw().to_vec(),
            subject_display: cert.subject().to_string(),
            issuer: cert.issuer().as_raw().to_vec(),
            issuer_display: cert.issuer().to_string(),
            common_name: extract_cn(&cert),
            public_key_info: spki.raw.to_vec(),
            public_key: spki.subject_public_key.data.to_vec(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            subject_alt_names: extract_sans(&cert),
            is_ca: cert.is_ca(),
            tbs: cert.tbs_certificate.as_ref().to_vec(),
            signature_algorithm: cert.signature_algorithm.algorithm.to_owned(),
            signature: cert.signature_value.data.to_vec(),
        })
    }

    /// The original DER encoding.
    #[must_use]
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// SHA-256 fingerprint of the DER encoding.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Raw DER of the subject distinguished name.
    #[must_use]
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject
    }

    /// Raw DER of the issuer distinguished name.
    #[must_use]
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer
    }

    /// RFC 4514 rendering of the subject.
    #[must_use]
    pub fn subject_name(&self) -> &str {
        &self.subject_display
    }

    /// RFC 4514 rendering of the issuer.
    #[must_use]
    pub fn issuer_name(&self) -> &str {
        &self.issuer_display
    }

    /// Subject Common Name, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Full `SubjectPublicKeyInfo` DER.
    #[must_use]
    pub fn public_key_info(&self) -> &[u8] {
        &self.public_key_info
    }

    /// Contents of the `subjectPublicKey` bit string.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// `notBefore` as Unix seconds.
    #[must_use]
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// `notAfter` as Unix seconds.
    #[must_use]
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Whether `unix_secs` falls inside the validity period (inclusive).
    #[must_use]
    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }

    /// DNS / IP / URI subject alternative names.
    #[must_use]
    pub fn subject_alt_names(&self) -> &[SubjectAltName] {
        &self.subject_alt_names
    }

    /// `basicConstraints` CA flag.
    #[must_use]
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Whether subject and issuer names are identical.
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// The DER `TBSCertificate` covered by the signature.
    #[must_use]
    pub fn signed_data(&self) -> &[u8] {
        &self.tbs
    }

    /// Signature algorithm OID used by the issuer.
    #[must_use]
    pub fn signature_algorithm(&self) -> &Oid<'static> {
        &self.signature_algorithm
    }

    /// Issuer signature bytes.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Human-readable label for logs and greetings.
    ///
    /// Prefers a SPIFFE URI SAN, then the CN, then `"<unknown>"`.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.subject_alt_names
            .iter()
            .find_map(|san| match san {
                SubjectAltName::Uri(uri) if uri.starts_with("spiffe://") => Some(uri.as_str()),
                _ => None,
            })
            .or(self.common_name.as_deref())
            .unwrap_or("<unknown>")
            .to_owned()
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject_display)
            .field("issuer", &self.issuer_display)
            .field("fingerprint", &self.fingerprint)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("is_ca", &self.is_ca)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for Certificate {}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_sans(cert: &X509Certificate<'_>) -> Vec<SubjectAltName> {
    let mut sans = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => sans.push(SubjectAltName::Dns((*dns).to_owned())),
                GeneralName::URI(uri) => sans.push(SubjectAltName::Uri((*uri).to_owned())),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_octets(bytes) {
                        sans.push(SubjectAltName::Ip(ip));
                    }
                }
                _ => {}
            }
        }
    }

    sans
}

fn ip_from_octets(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
