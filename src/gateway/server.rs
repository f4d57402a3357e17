//! Gateway server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::ChannelHandler;
use super::hello::HelloResponder;
use crate::config::{Config, KeySourceConfig};
use crate::keystore::{self, Identity, TrustAnchorSet};
use crate::negotiator::{Negotiator, PhaseTimeouts};
use crate::policy;
use crate::{Error, Result};

/// TLS gateway server
pub struct Gateway<H = HelloResponder> {
    /// Configuration
    config: Config,
    /// Handshake driver shared by all connection tasks
    negotiator: Arc<Negotiator>,
    /// Application handler for established channels
    handler: Arc<H>,
}

impl Gateway<HelloResponder> {
    /// Create a gateway serving the demo responder
    pub fn new(config: Config) -> Result<Self> {
        Self::with_handler(config, HelloResponder)
    }
}

impl<H: ChannelHandler> Gateway<H> {
    /// Create a gateway with a custom channel handler
    ///
    /// Loads the identity and trust anchors and computes the endpoint policy.
    /// Every failure here is a configuration error; nothing is bound yet.
    pub fn with_handler(config: Config, handler: H) -> Result<Self> {
        config.validate()?;

        let identity = if config.tls.enabled {
            Some(load_identity(&config.tls.identity)?)
        } else {
            None
        };
        let anchors = match (&config.tls.trust_anchors, config.tls.enabled) {
            (Some(source), true) => Some(Arc::new(load_anchors(source)?)),
            _ => None,
        };

        let decision = policy::decide(&config.tls, anchors)?;
        info!(
            mode = %decision.mode(),
            trust_anchors = decision.trust_anchors().map_or(0, |a| a.len()),
            client_names = decision.client_names().len(),
            "Endpoint policy decided"
        );
        if let Some(identity) = &identity {
            info!(
                subject = %identity.leaf().subject_name(),
                fingerprint = %identity.leaf().fingerprint(),
                chain_len = identity.certificate_chain().len(),
                "Server identity loaded"
            );
        }

        let negotiator = Negotiator::new(decision, identity.as_ref(), PhaseTimeouts::from(&config.server))?;

        Ok(Self {
            config,
            negotiator: Arc::new(negotiator),
            handler: Arc::new(handler),
        })
    }

    /// The negotiator used for every connection
    pub fn negotiator(&self) -> &Arc<Negotiator> {
        &self.negotiator
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        info!("TLS Gateway listening on {}", addr);
        info!("  Mode: {}", self.negotiator.decision().mode());
        info!(
            "  Timeouts: hello {:?}, client certificate {:?}, handshake {:?}",
            self.config.server.hello_timeout,
            self.config.server.client_certificate_timeout,
            self.config.server.handshake_timeout
        );

        self.serve(listener, shutdown_signal()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves
    ///
    /// Each connection is negotiated in its own task. In-flight connections
    /// get `server.shutdown_timeout` to finish after shutdown.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    next_id += 1;
                    let negotiator = Arc::clone(&self.negotiator);
                    let handler = Arc::clone(&self.handler);
                    tasks.spawn(serve_connection(negotiator, handler, stream, peer, next_id));
                }
            }
        }

        info!(in_flight = tasks.len(), "Listener stopped, draining connections");
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed");
                }
            }
        };
        if tokio::time::timeout(self.config.server.shutdown_timeout, drain).await.is_err() {
            warn!(aborted = tasks.len(), "Shutdown timeout reached, aborting connections");
            tasks.abort_all();
        }
        Ok(())
    }
}

/// Negotiate one connection and hand the channel to the application.
///
/// Failures stay inside this connection: they are logged and counted.
pub async fn serve_connection<S, H>(
    negotiator: Arc<Negotiator>,
    handler: Arc<H>,
    stream: S,
    peer: SocketAddr,
    id: u64,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: ChannelHandler,
{
    let mut channel = match negotiator.negotiate(stream, id).await {
        Ok(channel) => channel,
        Err(err) => {
            record_outcome(err.rejection.name());
            warn!(
                session = id,
                peer = %peer,
                phase = %err.failed_in,
                alert = err.rejection.name(),
                reason = err.rejection.chain_reason().map(|r| r.as_str()),
                "Handshake rejected"
            );
            return;
        }
    };

    record_outcome(if channel.is_encrypted() { "established" } else { "plaintext" });
    let client = channel.peer_identity().map(|c| c.display_name());
    debug!(session = id, peer = %peer, client = client.as_deref(), "Connection ready");

    if let Err(e) = handler.handle(&mut channel).await {
        debug!(session = id, peer = %peer, error = %e, "Channel ended with error");
    }
    channel.close().await;
}

fn record_outcome(outcome: &'static str) {
    telemetry_metrics::counter!("tls_gateway_handshakes_total", "outcome" => outcome).increment(1);
}

/// Shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

fn load_identity(source: &KeySourceConfig) -> Result<Identity> {
    let bytes = source.read()?;
    let password = source.resolve_password();
    let identity = keystore::load_identity(&bytes, password.as_deref()).inspect_err(|e| {
        warn!(path = %source.path, error = %e, "Failed to load server identity");
    })?;
    Ok(identity)
}

fn load_anchors(source: &KeySourceConfig) -> Result<TrustAnchorSet> {
    let bytes = source.read()?;
    let password = source.resolve_password();
    let anchors = keystore::load_trust_anchors(&bytes, password.as_deref()).inspect_err(|e| {
        warn!(path = %source.path, error = %e, "Failed to load trust anchors");
    })?;
    debug!(path = %source.path, count = anchors.len(), "Trust anchors loaded");
    Ok(anchors)
}
