//! Secure Channel Gateway
//!
//! [`SecureChannel`] is what the application sees after a successful
//! negotiation: framed-free `read`/`write`/`close` over either plaintext or
//! an established TLS session.

use std::io::{self, Read, Write};

use bytes::Bytes;
use rustls::ServerConnection;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::keystore::Certificate;
use crate::negotiator::HandshakeSession;
use crate::negotiator::wire::{READ_CHUNK, feed, flush};

/// Channel-scoped failure. Closes that channel only.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The handshake has not reached an application-ready phase.
    #[error("Channel not ready: handshake incomplete")]
    NotReady,
    /// The channel was closed locally or by the peer.
    #[error("Channel closed")]
    Closed,
    /// The TLS layer rejected incoming records.
    #[error("TLS protocol error: {0}")]
    Protocol(String),
    /// Transport failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

enum Transport<S> {
    Plain(S),
    Tls { io: S, conn: Box<ServerConnection> },
}

/// An application-ready connection.
pub struct SecureChannel<S> {
    transport: Option<Transport<S>>,
    session: HandshakeSession,
    peer: Option<Certificate>,
}

impl<S> std::fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match &self.transport {
            Some(Transport::Plain(_)) => "plaintext",
            Some(Transport::Tls { .. }) => "tls",
            None => "closed",
        };
        f.debug_struct("SecureChannel")
            .field("transport", &transport)
            .field("session", &self.session)
            .field("peer", &self.peer.as_ref().map(Certificate::display_name))
            .finish()
    }
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn plaintext(io: S, session: HandshakeSession) -> Self {
        Self {
            transport: Some(Transport::Plain(io)),
            session,
            peer: None,
        }
    }

    pub(crate) fn tls(io: S, conn: ServerConnection, session: HandshakeSession) -> Self {
        let peer = session
            .peer_certificate_chain()
            .and_then(|chain| chain.first())
            .and_then(|leaf| Certificate::from_der(leaf.clone()).ok());
        Self {
            transport: Some(Transport::Tls {
                io,
                conn: Box::new(conn),
            }),
            session,
            peer,
        }
    }

    /// The handshake session this channel was built from.
    pub fn session(&self) -> &HandshakeSession {
        &self.session
    }

    /// The authenticated client certificate, in mutual mode.
    pub fn peer_identity(&self) -> Option<&Certificate> {
        self.peer.as_ref()
    }

    /// Whether the channel carries TLS.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.transport, Some(Transport::Tls { .. }))
    }

    /// Read the next chunk of application data.
    ///
    /// Returns [`ChannelError::Closed`] once the peer has closed.
    pub async fn read(&mut self) -> Result<Bytes, ChannelError> {
        let transport = self.ready()?;
        let result = match transport {
            Transport::Plain(io) => read_plain(io).await,
            Transport::Tls { io, conn } => read_tls(conn, io).await,
        };
        if matches!(result, Err(ChannelError::Closed)) {
            self.release().await;
        }
        result
    }

    /// Write all of `data`. Returns the number of bytes written.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        match self.ready()? {
            Transport::Plain(io) => {
                io.write_all(data).await?;
                io.flush().await?;
            }
            Transport::Tls { io, conn } => {
                let mut rest = data;
                while !rest.is_empty() {
                    let n = conn.writer().write(rest)?;
                    flush(conn, io).await?;
                    rest = &rest[n..];
                }
            }
        }
        Ok(data.len())
    }

    /// Close the channel. Sends `close_notify` on TLS channels.
    ///
    /// Idempotent and infallible; transport errors during close are ignored.
    pub async fn close(&mut self) {
        self.release().await;
    }

    fn ready(&mut self) -> Result<&mut Transport<S>, ChannelError> {
        if self.session.is_closed() {
            return Err(ChannelError::Closed);
        }
        if !self.session.is_ready() {
            return Err(ChannelError::NotReady);
        }
        self.transport.as_mut().ok_or(ChannelError::Closed)
    }

    async fn release(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        match transport {
            Transport::Plain(mut io) => {
                let _ = io.shutdown().await;
            }
            Transport::Tls { mut io, mut conn } => {
                conn.send_close_notify();
                let _ = flush(&mut conn, &mut io).await;
                let _ = io.shutdown().await;
            }
        }
        self.session.mark_closed();
        debug!(session = self.session.id(), "Channel closed");
    }
}

async fn read_plain<S>(io: &mut S) -> Result<Bytes, ChannelError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let n = io.read(&mut buf).await?;
    if n == 0 {
        return Err(ChannelError::Closed);
    }
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

async fn read_tls<S>(conn: &mut ServerConnection, io: &mut S) -> Result<Bytes, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut plain = vec![0u8; READ_CHUNK];
    let mut incoming = [0u8; READ_CHUNK];
    loop {
        match conn.reader().read(&mut plain) {
            Ok(0) => return Err(ChannelError::Closed),
            Ok(n) => {
                plain.truncate(n);
                return Ok(Bytes::from(plain));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            // Peer vanished without close_notify
            Err(_) => return Err(ChannelError::Closed),
        }

        let n = io.read(&mut incoming).await?;
        if n == 0 {
            return Err(ChannelError::Closed);
        }
        if let Err(e) = feed(conn, &incoming[..n]) {
            let _ = flush(conn, io).await;
            return Err(ChannelError::Protocol(e.to_string()));
        }
        // Key updates and alerts generated while reading
        flush(conn, io).await?;
    }
}
