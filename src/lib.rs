//! TLS Gateway Library
//!
//! A minimal HTTP gateway that escalates transport security in three stages:
//! plaintext, server-authenticated TLS, and mutual TLS with client
//! certificate verification.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → Negotiator            (explicit per-connection handshake state machine)
//!       uses Identity        (keystore: private key + certificate chain)
//!       uses PolicyDecision  (policy: auth mode + trust anchors)
//!       calls validate_chain (policy: trust decision for peer chains)
//!   → SecureChannel          (read / write / close for the application)
//!   → ChannelHandler         (demo HTTP responder)
//! ```
//!
//! Record-layer cryptography is provided by `rustls` (TLS 1.3, `aws_lc_rs`);
//! the crate drives the connection by hand and supplies its own verifiers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod gateway;
pub mod keystore;
pub mod negotiator;
pub mod policy;

use std::sync::{Arc, OnceLock};

use rustls::crypto::CryptoProvider;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// ALPN protocol spoken over established channels.
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

/// The process-wide rustls crypto provider (`aws_lc_rs`).
///
/// Shared by server and client configs and by the handshake signature
/// checks so every component agrees on the supported algorithms.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    Arc::clone(PROVIDER.get_or_init(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider())))
}
