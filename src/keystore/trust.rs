//! Trust anchor set.

use std::collections::HashMap;

use rustls::DistinguishedName;

use super::certificate::{Certificate, Fingerprint};

/// Immutable set of trusted certificates.
///
/// Indexed by fingerprint for O(1) membership checks and by subject name so
/// the policy engine can find the anchor that issued a presented certificate.
/// Built once at startup and shared read-only (behind an `Arc`) by every
/// handshake.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorSet {
    by_fingerprint: HashMap<Fingerprint, Certificate>,
    by_subject: HashMap<Vec<u8>, Vec<Fingerprint>>,
}

impl TrustAnchorSet {
    /// Build a set from parsed certificates. Duplicates collapse.
    #[must_use]
    pub fn from_certificates(certs: impl IntoIterator<Item = Certificate>) -> Self {
        let mut set = Self::default();
        for cert in certs {
            let fp = cert.fingerprint();
            if set.by_fingerprint.contains_key(&fp) {
                continue;
            }
            set.by_subject
                .entry(cert.subject_raw().to_vec())
                .or_default()
                .push(fp);
            set.by_fingerprint.insert(fp, cert);
        }
        set
    }

    /// Whether a certificate with this fingerprint is trusted.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.by_fingerprint.contains_key(fingerprint)
    }

    /// Anchors whose subject equals `name` (raw DER).
    pub fn with_subject<'a>(&'a self, name: &[u8]) -> impl Iterator<Item = &'a Certificate> + 'a {
        self.by_subject
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|fp| self.by_fingerprint.get(fp))
    }

    /// Subject names offered to clients in the `CertificateRequest`.
    #[must_use]
    pub fn root_hint_subjects(&self) -> Vec<DistinguishedName> {
        self.by_subject
            .keys()
            .map(|subject| DistinguishedName::from(subject.clone()))
            .collect()
    }

    /// Number of anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}
