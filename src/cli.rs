//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// TLS Gateway - plaintext, server-auth TLS and mutual TLS on one listener
#[derive(Parser, Debug)]
#[command(name = "tls-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TLS_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TLS_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TLS_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TLS_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TLS_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Send one request to a gateway and print the response
    Probe(ProbeArgs),
}

/// Options for `probe`
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Gateway address (host:port)
    #[arg(long, default_value = "127.0.0.1:8443")]
    pub connect: String,

    /// Name to verify the server certificate against (and send as SNI)
    #[arg(long, default_value = "localhost")]
    pub server_name: String,

    /// CA bundle (PEM) used to verify the server; omit for plaintext
    #[arg(long)]
    pub ca: Option<PathBuf>,

    /// Client identity (PEM with certificate chain and private key)
    #[arg(long)]
    pub identity: Option<PathBuf>,

    /// Password for an encrypted client key
    #[arg(long, env = "TLS_GATEWAY_PROBE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Skip the SAN check against --server-name
    #[arg(long)]
    pub no_verify_hostname: bool,

    /// Request path
    #[arg(long, default_value = "/")]
    pub path: String,
}
