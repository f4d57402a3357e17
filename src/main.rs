//! TLS Gateway - plaintext, server-auth TLS and mutual TLS on one listener

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info};

use tls_gateway::{
    cli::{Cli, Command, ProbeArgs},
    config::Config,
    connector::Connector,
    gateway::Gateway,
    keystore::{self, Identity},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Probe(ref args)) => run_probe(args).await,
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        tls = config.tls.enabled,
        client_auth = config.tls.enabled && config.tls.client_auth_required,
        "Starting TLS Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

/// Send one request and print the response
async fn run_probe(args: &ProbeArgs) -> ExitCode {
    let stream = match TcpStream::connect(&args.connect).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Cannot connect to {}: {e}", args.connect);
            return ExitCode::FAILURE;
        }
    };

    let Some(ca) = &args.ca else {
        return exchange(stream, args).await;
    };

    let connector = match build_connector(ca, args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match connector.connect(stream, &args.server_name).await {
        Ok(tls) => exchange(tls, args).await,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_connector(ca: &std::path::Path, args: &ProbeArgs) -> tls_gateway::Result<Connector> {
    let anchors = keystore::load_trust_anchors(&std::fs::read(ca)?, None)?;
    let identity: Option<Identity> = match &args.identity {
        Some(path) => Some(keystore::load_identity(
            &std::fs::read(path)?,
            args.password.as_deref(),
        )?),
        None => None,
    };
    Connector::new(Arc::new(anchors), identity.as_ref(), !args.no_verify_hostname)
}

async fn exchange<S>(mut stream: S, args: &ProbeArgs) -> ExitCode
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.path, args.server_name
    );
    if let Err(e) = stream.write_all(request.as_bytes()).await {
        eprintln!("❌ Failed to send request: {e}");
        return ExitCode::FAILURE;
    }

    let mut response = Vec::new();
    match stream.read_to_end(&mut response).await {
        Ok(_) => {
            print!("{}", String::from_utf8_lossy(&response));
            ExitCode::SUCCESS
        }
        // Servers that skip close_notify still delivered the response
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !response.is_empty() => {
            print!("{}", String::from_utf8_lossy(&response));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to read response: {e}");
            ExitCode::FAILURE
        }
    }
}
