//! Per-connection handshake state.

use std::fmt;

use rustls::CipherSuite;
use rustls::pki_types::CertificateDer;

use super::rejection::Rejection;

/// Handshake phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Connection accepted, nothing read yet.
    Start,
    /// TLS is disabled; the connection is usable as plaintext.
    PlaintextOpen,
    /// Waiting for the ClientHello.
    AwaitClientHello,
    /// Cipher suite selected and server certificate chain sent.
    ServerAuthSent,
    /// Waiting for the client's certificate flight.
    AwaitClientCertificate,
    /// Waiting for the client's Finished.
    KeyExchange,
    /// Handshake complete.
    Established,
    /// Handshake failed.
    Rejected(Rejection),
}

impl Phase {
    /// Phases that end the handshake.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PlaintextOpen | Self::Established | Self::Rejected(_))
    }

    /// Whether `self → next` is a legal transition.
    pub fn permits(&self, next: &Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, Rejected(_)) => !from.is_terminal(),
            (Start, PlaintextOpen | AwaitClientHello)
            | (AwaitClientHello, ServerAuthSent)
            | (ServerAuthSent, AwaitClientCertificate | KeyExchange)
            | (AwaitClientCertificate, KeyExchange)
            | (KeyExchange, Established) => true,
            _ => false,
        }
    }

    /// Lowercase label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::PlaintextOpen => "plaintext_open",
            Self::AwaitClientHello => "await_client_hello",
            Self::ServerAuthSent => "server_auth_sent",
            Self::AwaitClientCertificate => "await_client_certificate",
            Self::KeyExchange => "key_exchange",
            Self::Established => "established",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one connection's handshake. Owned by the task driving it.
#[derive(Debug, Clone)]
pub struct HandshakeSession {
    id: u64,
    phase: Phase,
    client_auth_required: bool,
    cipher_suite: Option<CipherSuite>,
    server_name: Option<String>,
    peer_chain: Option<Vec<CertificateDer<'static>>>,
    server_chain_sent: bool,
    closed: bool,
}

impl HandshakeSession {
    /// A fresh session in [`Phase::Start`].
    pub fn new(id: u64, client_auth_required: bool) -> Self {
        Self {
            id,
            phase: Phase::Start,
            client_auth_required,
            cipher_suite: None,
            server_name: None,
            peer_chain: None,
            server_chain_sent: false,
            closed: false,
        }
    }

    /// Connection identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Whether the endpoint demands a client certificate.
    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    /// Cipher suite chosen from the ClientHello.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    /// SNI value offered by the client.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Client certificate chain, leaf first, once presented and accepted.
    pub fn peer_certificate_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.peer_chain.as_deref()
    }

    /// Whether the TLS handshake completed.
    pub fn is_established(&self) -> bool {
        self.phase == Phase::Established
    }

    /// Whether application data may flow: established TLS or plaintext mode.
    pub fn is_ready(&self) -> bool {
        !self.closed && matches!(self.phase, Phase::Established | Phase::PlaintextOpen)
    }

    /// Whether the channel built on this session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn set_server_name(&mut self, name: Option<String>) {
        self.server_name = name;
    }

    pub(crate) fn set_cipher_suite(&mut self, suite: Option<CipherSuite>) {
        self.cipher_suite = suite;
    }

    pub(crate) fn mark_server_chain_sent(&mut self) {
        self.server_chain_sent = true;
    }

    pub(crate) fn record_peer_chain(&mut self, chain: Vec<CertificateDer<'static>>) {
        self.peer_chain = Some(chain);
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Move to `next`, enforcing the transition table and the evidence each
    /// transition needs.
    pub(crate) fn advance(&mut self, next: Phase) -> Result<(), Rejection> {
        if !self.phase.permits(&next) {
            return Err(Rejection::protocol(format!(
                "illegal transition {} -> {}",
                self.phase, next
            )));
        }
        match (&self.phase, &next) {
            (Phase::ServerAuthSent, Phase::KeyExchange) if self.client_auth_required => {
                return Err(Rejection::BadCertificate);
            }
            (Phase::AwaitClientCertificate, Phase::KeyExchange)
                if self.peer_chain.as_ref().is_none_or(Vec::is_empty) =>
            {
                return Err(Rejection::BadCertificate);
            }
            (Phase::KeyExchange, Phase::Established) if !self.server_chain_sent => {
                return Err(Rejection::protocol("server certificate chain was never sent"));
            }
            (Phase::KeyExchange, Phase::Established)
                if self.client_auth_required && self.peer_chain.is_none() =>
            {
                return Err(Rejection::BadCertificate);
            }
            _ => {}
        }
        self.phase = next;
        Ok(())
    }

    /// Enter [`Phase::Rejected`] and return the phase the handshake failed in.
    pub(crate) fn reject(&mut self, rejection: Rejection) -> Phase {
        let failed_in = self.phase.clone();
        if !self.phase.is_terminal() {
            self.phase = Phase::Rejected(rejection);
        }
        failed_in
    }
}
