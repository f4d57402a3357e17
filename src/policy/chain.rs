//! Certificate chain validation.
//!
//! [`validate_chain`] is the single trust decision used by both roles. It is
//! a pure function of its inputs and checks, in order:
//!
//! 1. structure (non-empty, every certificate parses)
//! 2. anchoring (the chain reaches a trust anchor through CA issuers)
//! 3. validity of every certificate on the path at the reference time
//! 4. signatures along the path
//! 5. SAN names of the leaf, when names are expected
//!
//! The first failing check determines the [`RejectReason`].

use std::fmt;

use rustls::pki_types::{CertificateDer, UnixTime};
use thiserror::Error;

use super::names::ExpectedName;
use super::signature::is_signed_by;
use crate::keystore::{Certificate, TrustAnchorSet};

/// Why a chain was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// A certificate on the path is outside its validity window.
    Expired,
    /// The chain does not reach a trust anchor through CA issuers.
    UntrustedIssuer,
    /// An issuer's key does not verify a subject's signature.
    SignatureMismatch,
    /// The leaf does not carry any expected name.
    NameMismatch,
    /// No certificates were presented.
    EmptyChain,
    /// A presented certificate could not be parsed.
    Malformed,
}

impl RejectReason {
    /// Stable kebab-case label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::UntrustedIssuer => "untrusted-issuer",
            Self::SignatureMismatch => "signature-mismatch",
            Self::NameMismatch => "name-mismatch",
            Self::EmptyChain => "empty-chain",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`validate_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The chain is trusted.
    Accepted,
    /// The chain is not trusted.
    Rejected(RejectReason),
}

impl Verdict {
    /// Whether the verdict is [`Verdict::Accepted`].
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Error carried through rustls when a verifier rejects a chain, so the
/// negotiator can recover the [`RejectReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("certificate chain rejected: {0}")]
pub struct ChainRejection(pub RejectReason);

/// Decide whether `chain` (leaf first) is trusted.
pub fn validate_chain(
    chain: &[CertificateDer<'_>],
    anchors: &TrustAnchorSet,
    reference_time: UnixTime,
    expected_names: &[ExpectedName],
) -> Verdict {
    match check(chain, anchors, reference_time, expected_names) {
        Ok(()) => Verdict::Accepted,
        Err(reason) => Verdict::Rejected(reason),
    }
}

fn check(
    chain: &[CertificateDer<'_>],
    anchors: &TrustAnchorSet,
    reference_time: UnixTime,
    expected_names: &[ExpectedName],
) -> Result<(), RejectReason> {
    if chain.is_empty() {
        return Err(RejectReason::EmptyChain);
    }
    let presented = chain
        .iter()
        .map(|der| Certificate::from_der(der.clone().into_owned()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RejectReason::Malformed)?;

    let path = TrustPath::build(&presented, anchors)?;

    let now = i64::try_from(reference_time.as_secs()).unwrap_or(i64::MAX);
    path.check_validity(now)?;
    path.check_signatures(now)?;

    if !expected_names.is_empty() && !expected_names.iter().any(|n| n.matches(&presented[0])) {
        return Err(RejectReason::NameMismatch);
    }
    Ok(())
}

/// The presented prefix that reaches an anchor, and how it ends.
struct TrustPath<'a> {
    links: &'a [Certificate],
    terminus: Terminus<'a>,
}

enum Terminus<'a> {
    /// The last link is itself a trust anchor.
    Pinned,
    /// The last link was issued by one of these anchors (all CAs sharing
    /// its issuer name).
    IssuedBy(Vec<&'a Certificate>),
}

impl<'a> TrustPath<'a> {
    fn build(presented: &'a [Certificate], anchors: &'a TrustAnchorSet) -> Result<Self, RejectReason> {
        for (index, cert) in presented.iter().enumerate() {
            let links = &presented[..=index];
            if anchors.contains(&cert.fingerprint()) {
                return Ok(Self { links, terminus: Terminus::Pinned });
            }

            let issuers: Vec<&Certificate> = anchors.with_subject(cert.issuer_raw()).collect();
            if !issuers.is_empty() {
                let issuers: Vec<&Certificate> = issuers.into_iter().filter(|a| a.is_ca()).collect();
                if issuers.is_empty() {
                    return Err(RejectReason::UntrustedIssuer);
                }
                return Ok(Self { links, terminus: Terminus::IssuedBy(issuers) });
            }

            match presented.get(index + 1) {
                Some(next) if next.subject_raw() == cert.issuer_raw() && next.is_ca() => {}
                _ => return Err(RejectReason::UntrustedIssuer),
            }
        }
        Err(RejectReason::UntrustedIssuer)
    }

    fn check_validity(&self, now: i64) -> Result<(), RejectReason> {
        if self.links.iter().any(|cert| !cert.is_valid_at(now)) {
            return Err(RejectReason::Expired);
        }
        if let Terminus::IssuedBy(issuers) = &self.terminus {
            if !issuers.iter().any(|anchor| anchor.is_valid_at(now)) {
                return Err(RejectReason::Expired);
            }
        }
        Ok(())
    }

    fn check_signatures(&self, now: i64) -> Result<(), RejectReason> {
        for pair in self.links.windows(2) {
            if !is_signed_by(&pair[0], &pair[1]) {
                return Err(RejectReason::SignatureMismatch);
            }
        }
        match &self.terminus {
            Terminus::Pinned => Ok(()),
            Terminus::IssuedBy(issuers) => {
                let last = &self.links[self.links.len() - 1];
                let verified = issuers
                    .iter()
                    .filter(|anchor| anchor.is_valid_at(now))
                    .any(|anchor| is_signed_by(last, anchor));
                if verified { Ok(()) } else { Err(RejectReason::SignatureMismatch) }
            }
        }
    }
}
