//! TLS Connection Negotiator
//!
//! Drives one connection's handshake as an explicit state machine:
//!
//! ```text
//! Start ─┬─► PlaintextOpen                                   (TLS disabled)
//!        └─► AwaitClientHello ─► ServerAuthSent ─┬─► KeyExchange ─► Established
//!                                                └─► AwaitClientCertificate ─► KeyExchange
//! any non-terminal phase ─► Rejected(alert)
//! ```
//!
//! The rustls `Acceptor` and `ServerConnection` are fed by hand so each
//! phase is observable and has its own deadline. Rejections flush the
//! pending alert to the peer before the transport is dropped.

mod endpoint;
mod rejection;
mod session;
pub(crate) mod wire;

use std::sync::Arc;
use std::time::Duration;

use rustls::server::{Accepted, Acceptor};
use rustls::{ServerConfig, ServerConnection};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

pub use rejection::{FailureCause, Rejection};
pub use session::{HandshakeSession, Phase};

pub(crate) use rejection::classify_io;

use crate::channel::SecureChannel;
use crate::keystore::Identity;
use crate::policy::PolicyDecision;
use crate::{Error, Result};
use rejection::classify;
use wire::{READ_CHUNK, feed, flush};

/// A handshake that ended without a channel. Scoped to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session {session} rejected in {failed_in}: {rejection}")]
pub struct HandshakeError {
    /// Connection identifier.
    pub session: u64,
    /// Phase the handshake was in when it failed.
    pub failed_in: Phase,
    /// Why it failed.
    pub rejection: Rejection,
}

/// Per-phase deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    /// Bound on [`Phase::AwaitClientHello`].
    pub client_hello: Duration,
    /// Bound on [`Phase::AwaitClientCertificate`].
    pub client_certificate: Duration,
    /// Bound on [`Phase::KeyExchange`].
    pub key_exchange: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            client_hello: Duration::from_secs(10),
            client_certificate: Duration::from_secs(10),
            key_exchange: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::ServerConfig> for PhaseTimeouts {
    fn from(config: &crate::config::ServerConfig) -> Self {
        Self {
            client_hello: config.hello_timeout,
            client_certificate: config.client_certificate_timeout,
            key_exchange: config.handshake_timeout,
        }
    }
}

/// Negotiates connections for one endpoint.
///
/// Immutable after construction and shared between connection tasks.
#[derive(Debug)]
pub struct Negotiator {
    decision: PolicyDecision,
    tls: Option<Arc<ServerConfig>>,
    timeouts: PhaseTimeouts,
}

impl Negotiator {
    /// Build a negotiator. TLS modes need the server `identity`.
    pub fn new(
        decision: PolicyDecision,
        identity: Option<&Identity>,
        timeouts: PhaseTimeouts,
    ) -> Result<Self> {
        let tls = if decision.tls_enabled() {
            let identity = identity.ok_or_else(|| {
                Error::Config("TLS is enabled but no server identity was loaded".to_string())
            })?;
            Some(endpoint::server_config(&decision, identity)?)
        } else {
            None
        };
        Ok(Self { decision, tls, timeouts })
    }

    /// The endpoint policy.
    pub fn decision(&self) -> &PolicyDecision {
        &self.decision
    }

    /// Phase deadlines.
    pub fn timeouts(&self) -> PhaseTimeouts {
        self.timeouts
    }

    /// Run the handshake on `io`.
    ///
    /// Returns a ready channel, or the phase and reason of the rejection.
    pub async fn negotiate<S>(
        &self,
        mut io: S,
        id: u64,
    ) -> std::result::Result<SecureChannel<S>, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = HandshakeSession::new(id, self.decision.client_auth_required());

        let Some(config) = self.tls.clone() else {
            step(&mut session, Phase::PlaintextOpen)?;
            debug!(session = id, "Plaintext connection open");
            return Ok(SecureChannel::plaintext(io, session));
        };

        step(&mut session, Phase::AwaitClientHello)?;
        let deadline = Instant::now() + self.timeouts.client_hello;
        let accepted = match timeout_at(deadline, read_client_hello(&mut io)).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(rejection)) => return Err(fail(&mut session, rejection)),
            Err(_) => return Err(fail(&mut session, Rejection::TimedOut)),
        };

        {
            let hello = accepted.client_hello();
            session.set_server_name(hello.server_name().map(str::to_owned));
            debug!(
                session = id,
                sni = ?hello.server_name(),
                offered_suites = hello.cipher_suites().len(),
                "ClientHello received"
            );
        }

        let mut conn = match accepted.into_connection(config) {
            Ok(conn) => conn,
            Err((err, mut alert)) => {
                let mut out = Vec::new();
                if alert.write_all(&mut out).is_ok() {
                    let _ = io.write_all(&out).await;
                }
                return Err(fail(&mut session, classify(&err)));
            }
        };
        session.set_cipher_suite(conn.negotiated_cipher_suite().map(|s| s.suite()));

        if let Err(e) = flush(&mut conn, &mut io).await {
            debug!(session = id, error = %e, "Failed to send server flight");
            return Err(fail(&mut session, Rejection::ConnectionClosed));
        }
        session.mark_server_chain_sent();
        step(&mut session, Phase::ServerAuthSent)?;

        if session.client_auth_required() {
            step(&mut session, Phase::AwaitClientCertificate)?;
        } else {
            step(&mut session, Phase::KeyExchange)?;
        }

        let mut deadline = Instant::now() + self.phase_timeout(session.phase());
        while conn.is_handshaking() {
            match timeout_at(deadline, read_flight(&mut conn, &mut io)).await {
                Ok(Ok(())) => {}
                Ok(Err(rejection)) => {
                    // Chain accepted earlier in the same flight
                    absorb_client_chain(&mut session, &conn)?;
                    let _ = flush(&mut conn, &mut io).await;
                    return Err(fail(&mut session, rejection));
                }
                Err(_) => return Err(fail(&mut session, Rejection::TimedOut)),
            }

            if absorb_client_chain(&mut session, &conn)? {
                deadline = Instant::now() + self.timeouts.key_exchange;
            }

            if let Err(e) = flush(&mut conn, &mut io).await {
                debug!(session = id, error = %e, "Transport failed mid-handshake");
                return Err(fail(&mut session, Rejection::ConnectionClosed));
            }
        }

        step(&mut session, Phase::Established)?;
        // Session tickets
        let _ = flush(&mut conn, &mut io).await;

        info!(
            session = id,
            sni = ?session.server_name(),
            cipher_suite = ?session.cipher_suite(),
            client_auth = session.client_auth_required(),
            "TLS handshake established"
        );
        Ok(SecureChannel::tls(io, conn, session))
    }

    fn phase_timeout(&self, phase: &Phase) -> Duration {
        match phase {
            Phase::AwaitClientHello => self.timeouts.client_hello,
            Phase::AwaitClientCertificate => self.timeouts.client_certificate,
            _ => self.timeouts.key_exchange,
        }
    }
}

/// Advance or reject.
fn step(session: &mut HandshakeSession, next: Phase) -> std::result::Result<(), HandshakeError> {
    session.advance(next).map_err(|rejection| fail(session, rejection))
}

/// Move past `AwaitClientCertificate` once rustls has verified the client chain.
fn absorb_client_chain(
    session: &mut HandshakeSession,
    conn: &ServerConnection,
) -> std::result::Result<bool, HandshakeError> {
    if *session.phase() != Phase::AwaitClientCertificate {
        return Ok(false);
    }
    let Some(chain) = conn.peer_certificates() else {
        return Ok(false);
    };
    session.record_peer_chain(chain.iter().map(|c| c.clone().into_owned()).collect());
    step(session, Phase::KeyExchange)?;
    Ok(true)
}

fn fail(session: &mut HandshakeSession, rejection: Rejection) -> HandshakeError {
    let failed_in = session.reject(rejection.clone());
    debug!(
        session = session.id(),
        phase = %failed_in,
        alert = rejection.name(),
        reason = ?rejection.chain_reason().map(|r| r.as_str()),
        "Handshake rejected"
    );
    HandshakeError {
        session: session.id(),
        failed_in,
        rejection,
    }
}

async fn read_client_hello<S>(io: &mut S) -> std::result::Result<Accepted, Rejection>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut acceptor = Acceptor::default();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = io.read(&mut buf).await.map_err(|_| Rejection::ConnectionClosed)?;
        if n == 0 {
            return Err(Rejection::ConnectionClosed);
        }
        let mut incoming = &buf[..n];
        while !incoming.is_empty() {
            acceptor
                .read_tls(&mut incoming)
                .map_err(|e| Rejection::protocol(e.to_string()))?;
        }
        match acceptor.accept() {
            Ok(Some(accepted)) => return Ok(accepted),
            Ok(None) => {}
            Err((err, mut alert)) => {
                let mut out = Vec::new();
                if alert.write_all(&mut out).is_ok() {
                    let _ = io.write_all(&out).await;
                }
                return Err(classify(&err));
            }
        }
    }
}

async fn read_flight<S>(conn: &mut ServerConnection, io: &mut S) -> std::result::Result<(), Rejection>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    let n = io.read(&mut buf).await.map_err(|_| Rejection::ConnectionClosed)?;
    if n == 0 {
        return Err(Rejection::ConnectionClosed);
    }
    feed(conn, &buf[..n]).map_err(|e| classify(&e))
}
