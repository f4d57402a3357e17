//! Certificate signature checks.
//!
//! Maps the X.509 signature algorithm OID (plus the issuer key size for
//! ECDSA) onto an `aws-lc-rs` verification algorithm and verifies the
//! subject's `TBSCertificate` against the issuer's public key.

use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use x509_parser::oid_registry::{
    OID_PKCS1_SHA256WITHRSA, OID_PKCS1_SHA384WITHRSA, OID_PKCS1_SHA512WITHRSA,
    OID_SIG_ECDSA_WITH_SHA256, OID_SIG_ECDSA_WITH_SHA384, OID_SIG_ED25519,
};

use crate::keystore::Certificate;

/// Uncompressed SEC1 point lengths.
const P256_POINT_LEN: usize = 65;
const P384_POINT_LEN: usize = 97;

/// Whether `issuer`'s key verifies the signature on `subject`.
///
/// Unsupported algorithms never verify.
pub(crate) fn is_signed_by(subject: &Certificate, issuer: &Certificate) -> bool {
    let Some(algorithm) = algorithm_for(subject, issuer) else {
        return false;
    };
    UnparsedPublicKey::new(algorithm, issuer.public_key())
        .verify(subject.signed_data(), subject.signature())
        .is_ok()
}

fn algorithm_for(
    subject: &Certificate,
    issuer: &Certificate,
) -> Option<&'static dyn VerificationAlgorithm> {
    let oid = subject.signature_algorithm();
    let key_len = issuer.public_key().len();

    if *oid == OID_SIG_ECDSA_WITH_SHA256 {
        match key_len {
            P256_POINT_LEN => Some(&signature::ECDSA_P256_SHA256_ASN1),
            P384_POINT_LEN => Some(&signature::ECDSA_P384_SHA256_ASN1),
            _ => None,
        }
    } else if *oid == OID_SIG_ECDSA_WITH_SHA384 {
        match key_len {
            P256_POINT_LEN => Some(&signature::ECDSA_P256_SHA384_ASN1),
            P384_POINT_LEN => Some(&signature::ECDSA_P384_SHA384_ASN1),
            _ => None,
        }
    } else if *oid == OID_PKCS1_SHA256WITHRSA {
        Some(&signature::RSA_PKCS1_2048_8192_SHA256)
    } else if *oid == OID_PKCS1_SHA384WITHRSA {
        Some(&signature::RSA_PKCS1_2048_8192_SHA384)
    } else if *oid == OID_PKCS1_SHA512WITHRSA {
        Some(&signature::RSA_PKCS1_2048_8192_SHA512)
    } else if *oid == OID_SIG_ED25519 {
        Some(&signature::ED25519)
    } else {
        None
    }
}
