//! Certificate store adapter.
//!
//! Turns opaque byte sources into the two immutable values every endpoint
//! needs: the server [`Identity`] (private key + leaf-first certificate
//! chain) and the [`TrustAnchorSet`] used to validate peers.
//!
//! # Source format
//!
//! Sources are PEM bundles.  An identity bundle holds one or more
//! `CERTIFICATE` blocks (leaf first) and exactly one private key, which may
//! be `PRIVATE KEY` (PKCS#8), `RSA PRIVATE KEY` (PKCS#1), `EC PRIVATE KEY`
//! (SEC1) or `ENCRYPTED PRIVATE KEY` (PKCS#8 / PBES2).  A trust bundle holds
//! `CERTIFICATE` blocks only.
//!
//! # Passwords
//!
//! A password is required exactly when the source contains encrypted
//! material.  Supplying one for an unprotected source is reported as
//! [`KeyStoreError::WrongPassword`]: the source is not protected by it.
//!
//! Reading the bytes from disk is the caller's job (see
//! [`crate::config::KeySourceConfig::read`]); nothing here touches the
//! filesystem.

pub mod certificate;
pub mod trust;

use std::fmt;

use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use thiserror::Error;
use tracing::debug;
use x509_parser::pem::Pem;

pub use certificate::{Certificate, Fingerprint, SubjectAltName};
pub use trust::TrustAnchorSet;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a key or trust store could not be loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The source is not valid PEM, or a block inside it is not valid DER.
    #[error("malformed source: {0}")]
    Malformed(String),

    /// The source contains no certificate.
    #[error("no certificate found in source")]
    NoCertificate,

    /// The identity source contains no private key.
    #[error("no private key found in source")]
    NoPrivateKey,

    /// The identity source contains more than one private key.
    #[error("source contains {0} private keys, expected exactly one")]
    MultiplePrivateKeys(usize),

    /// The source is encrypted and no password was supplied.
    #[error("source is password-protected but no password was supplied")]
    PasswordRequired,

    /// The supplied password does not open the source.
    #[error("wrong password for source")]
    WrongPassword,

    /// The private key does not belong to the leaf certificate.
    #[error("private key does not match the leaf certificate")]
    KeyMismatch,

    /// The private key algorithm is not supported by the TLS provider.
    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// A private key plus its certificate chain (leaf first).
///
/// Loaded once at startup and never mutated.  The key is never serialised
/// outward; `Debug` redacts it.
pub struct Identity {
    chain: Vec<Certificate>,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    /// The end-entity certificate.
    #[must_use]
    pub fn leaf(&self) -> &Certificate {
        // `load_identity` rejects empty chains
        &self.chain[0]
    }

    /// The full chain, leaf first.
    #[must_use]
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// DER copy of the chain, as handed to rustls.
    #[must_use]
    pub fn chain_der(&self) -> Vec<CertificateDer<'static>> {
        self.chain.iter().map(|c| c.der().clone()).collect()
    }

    /// A copy of the private key for building a TLS config.
    pub(crate) fn private_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("chain", &self.chain)
            .field("key", &"<redacted>")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load an identity from a PEM bundle.
///
/// # Errors
///
/// Returns a [`KeyStoreError`] when the source is malformed, the password is
/// missing or wrong, or no matching key/certificate pair exists.
pub fn load_identity(source: &[u8], password: Option<&str>) -> Result<Identity, KeyStoreError> {
    let blocks = read_blocks(source)?;
    let password = password.filter(|p| !p.is_empty());

    let mut chain = Vec::new();
    let mut keys = Vec::new();
    for block in blocks {
        match block {
            Block::Certificate(der) => chain.push(Certificate::from_der(der)?),
            Block::Key(key) => keys.push(key),
        }
    }

    if chain.is_empty() {
        return Err(KeyStoreError::NoCertificate);
    }
    let key = match keys.len() {
        0 => return Err(KeyStoreError::NoPrivateKey),
        1 => keys.remove(0),
        n => return Err(KeyStoreError::MultiplePrivateKeys(n)),
    };

    let key = match (key, password) {
        (KeyBlock::Encrypted(_), None) => return Err(KeyStoreError::PasswordRequired),
        (KeyBlock::Encrypted(der), Some(pw)) => decrypt_pkcs8(&der, pw)?,
        (KeyBlock::Plain(_), Some(_)) => return Err(KeyStoreError::WrongPassword),
        (KeyBlock::Plain(key), None) => key,
    };

    ensure_key_matches(chain[0].public_key_info(), &key)?;

    debug!(
        subject = %chain[0].subject_name(),
        chain_len = chain.len(),
        fingerprint = %chain[0].fingerprint(),
        "Identity loaded"
    );

    Ok(Identity { chain, key })
}

/// Load a trust anchor set from a PEM bundle.
///
/// # Errors
///
/// Returns a [`KeyStoreError`] when the source is malformed, contains no
/// certificate, or a password was supplied for it (PEM trust bundles carry
/// no protection, so any password is the wrong one).
pub fn load_trust_anchors(
    source: &[u8],
    password: Option<&str>,
) -> Result<TrustAnchorSet, KeyStoreError> {
    if password.is_some_and(|p| !p.is_empty()) {
        return Err(KeyStoreError::WrongPassword);
    }

    let mut anchors = Vec::new();
    for block in read_blocks(source)? {
        match block {
            Block::Certificate(der) => anchors.push(Certificate::from_der(der)?),
            Block::Key(_) => {
                return Err(KeyStoreError::Malformed(
                    "trust bundle must not contain private keys".to_string(),
                ));
            }
        }
    }

    if anchors.is_empty() {
        return Err(KeyStoreError::NoCertificate);
    }

    let set = TrustAnchorSet::from_certificates(anchors);
    debug!(anchors = set.len(), "Trust anchors loaded");
    Ok(set)
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

enum KeyBlock {
    Plain(PrivateKeyDer<'static>),
    Encrypted(Vec<u8>),
}

enum Block {
    Certificate(CertificateDer<'static>),
    Key(KeyBlock),
}

fn read_blocks(source: &[u8]) -> Result<Vec<Block>, KeyStoreError> {
    let mut blocks = Vec::new();
    for pem in Pem::iter_from_buffer(source) {
        let pem = pem.map_err(|e| KeyStoreError::Malformed(format!("invalid PEM: {e}")))?;
        let block = match pem.label.as_str() {
            "CERTIFICATE" => Block::Certificate(CertificateDer::from(pem.contents)),
            "PRIVATE KEY" => Block::Key(KeyBlock::Plain(PrivateKeyDer::Pkcs8(
                PrivatePkcs8KeyDer::from(pem.contents),
            ))),
            "RSA PRIVATE KEY" => Block::Key(KeyBlock::Plain(PrivateKeyDer::Pkcs1(
                PrivatePkcs1KeyDer::from(pem.contents),
            ))),
            "EC PRIVATE KEY" => Block::Key(KeyBlock::Plain(PrivateKeyDer::Sec1(
                PrivateSec1KeyDer::from(pem.contents),
            ))),
            "ENCRYPTED PRIVATE KEY" => Block::Key(KeyBlock::Encrypted(pem.contents)),
            other => {
                return Err(KeyStoreError::Malformed(format!(
                    "unsupported PEM block '{other}'"
                )));
            }
        };
        blocks.push(block);
    }
    Ok(blocks)
}

fn decrypt_pkcs8(der: &[u8], password: &str) -> Result<PrivateKeyDer<'static>, KeyStoreError> {
    let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| KeyStoreError::Malformed(format!("invalid encrypted key: {e}")))?;
    let document = encrypted
        .decrypt(password)
        .map_err(|_| KeyStoreError::WrongPassword)?;
    // A wrong password occasionally yields valid padding over garbage.
    pkcs8::PrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|_| KeyStoreError::WrongPassword)?;
    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        document.as_bytes().to_vec(),
    )))
}

fn ensure_key_matches(leaf_spki: &[u8], key: &PrivateKeyDer<'static>) -> Result<(), KeyStoreError> {
    let provider = crate::crypto_provider();
    let signer = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| KeyStoreError::UnsupportedKey(e.to_string()))?;

    match signer.public_key() {
        Some(spki) if spki.as_ref() != leaf_spki => Err(KeyStoreError::KeyMismatch),
        _ => Ok(()),
    }
}
