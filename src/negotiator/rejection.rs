//! Why a handshake ended without a channel.

use std::fmt;
use std::io;

use rustls::{AlertDescription, CertificateError};

use crate::policy::{ChainRejection, RejectReason};

/// Terminal failure of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The client presented no certificate when one was required.
    BadCertificate,
    /// The handshake failed; carries the chain reason when there is one.
    HandshakeFailure(FailureCause),
    /// The peer's handshake signature or Finished did not verify.
    DecryptError,
    /// The presented chain is outside its validity window.
    CertificateExpired,
    /// The peer closed the transport mid-handshake.
    ConnectionClosed,
    /// A phase deadline passed.
    TimedOut,
}

/// Detail for [`Rejection::HandshakeFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Chain validation rejected the peer.
    Chain(RejectReason),
    /// Any other protocol failure reported by the TLS stack.
    Protocol(String),
}

impl Rejection {
    pub(crate) fn protocol(detail: impl Into<String>) -> Self {
        Self::HandshakeFailure(FailureCause::Protocol(detail.into()))
    }

    /// The TLS alert this rejection corresponds to, if one is sent.
    pub fn alert(&self) -> Option<AlertDescription> {
        match self {
            Self::BadCertificate => Some(AlertDescription::BadCertificate),
            Self::HandshakeFailure(_) => Some(AlertDescription::HandshakeFailure),
            Self::DecryptError => Some(AlertDescription::DecryptError),
            Self::CertificateExpired => Some(AlertDescription::CertificateExpired),
            Self::ConnectionClosed | Self::TimedOut => None,
        }
    }

    /// Stable snake_case label used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BadCertificate => "bad_certificate",
            Self::HandshakeFailure(_) => "handshake_failure",
            Self::DecryptError => "decrypt_error",
            Self::CertificateExpired => "certificate_expired",
            Self::ConnectionClosed => "connection_closed",
            Self::TimedOut => "timed_out",
        }
    }

    /// The chain validation reason behind this rejection, if any.
    pub fn chain_reason(&self) -> Option<RejectReason> {
        match self {
            Self::HandshakeFailure(FailureCause::Chain(reason)) => Some(*reason),
            Self::CertificateExpired => Some(RejectReason::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeFailure(FailureCause::Chain(reason)) => {
                write!(f, "{} ({reason})", self.name())
            }
            Self::HandshakeFailure(FailureCause::Protocol(detail)) => {
                write!(f, "{} ({detail})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Map a rustls failure onto a [`Rejection`].
pub(crate) fn classify(err: &rustls::Error) -> Rejection {
    match err {
        rustls::Error::NoCertificatesPresented => Rejection::BadCertificate,
        rustls::Error::InvalidCertificate(
            CertificateError::Expired | CertificateError::NotValidYet,
        ) => Rejection::CertificateExpired,
        rustls::Error::InvalidCertificate(CertificateError::BadSignature)
        | rustls::Error::DecryptError => Rejection::DecryptError,
        rustls::Error::Other(other) => match other.0.downcast_ref::<ChainRejection>() {
            Some(ChainRejection(RejectReason::Expired)) => Rejection::CertificateExpired,
            Some(ChainRejection(reason)) => Rejection::HandshakeFailure(FailureCause::Chain(*reason)),
            None => Rejection::protocol(err.to_string()),
        },
        rustls::Error::AlertReceived(AlertDescription::CertificateExpired) => {
            Rejection::CertificateExpired
        }
        rustls::Error::AlertReceived(AlertDescription::BadCertificate) => Rejection::BadCertificate,
        rustls::Error::AlertReceived(AlertDescription::DecryptError) => Rejection::DecryptError,
        _ => Rejection::protocol(err.to_string()),
    }
}

/// Map an IO failure from a TLS stream onto a [`Rejection`].
///
/// `tokio-rustls` wraps rustls errors in `io::Error`; those are unwrapped
/// and classified, everything else means the transport went away.
pub(crate) fn classify_io(err: &io::Error) -> Rejection {
    if let Some(tls) = err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        return classify(tls);
    }
    match err.kind() {
        io::ErrorKind::TimedOut => Rejection::TimedOut,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => Rejection::ConnectionClosed,
        _ => Rejection::protocol(err.to_string()),
    }
}
