//! End-to-end handshakes over in-memory streams.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rustls::ClientConnection;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio_rustls::client::TlsStream;

use common::{Pki, Setup, fast_timeouts};
use tls_gateway::channel::{ChannelError, SecureChannel};
use tls_gateway::connector::{ConnectError, Connector};
use tls_gateway::gateway::{ChannelHandler, HelloResponder};
use tls_gateway::keystore;
use tls_gateway::negotiator::{
    FailureCause, HandshakeError, Negotiator, Phase, PhaseTimeouts, Rejection,
};
use tls_gateway::policy::RejectReason;

type ServerSide = Result<SecureChannel<DuplexStream>, HandshakeError>;
type ClientSide = Result<TlsStream<DuplexStream>, ConnectError>;

async fn handshake(negotiator: &Negotiator, connector: &Connector, server_name: &str) -> (ServerSide, ClientSide) {
    let (server_io, client_io) = duplex(64 * 1024);
    tokio::join!(
        negotiator.negotiate(server_io, 1),
        connector.connect(client_io, server_name)
    )
}

fn rejection(server: ServerSide) -> HandshakeError {
    match server {
        Ok(_) => panic!("expected the server to reject the handshake"),
        Err(err) => err,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario A: server-auth only, anonymous client
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn server_auth_only_accepts_anonymous_clients() {
    // GIVEN: a server-auth endpoint and a client without identity
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let connector = setup.connector(None);

    // WHEN: the client handshakes
    let (server, client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: established without a peer identity
    let mut channel = server.unwrap();
    let mut client = client.unwrap();
    assert!(channel.session().is_established());
    assert!(!channel.session().client_auth_required());
    assert!(channel.peer_identity().is_none());

    // AND: data flows in both directions
    client.write_all(b"ping").await.unwrap();
    assert_eq!(&channel.read().await.unwrap()[..], b"ping");
    channel.write(b"pong").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario B: mutual TLS, client presents nothing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutual_tls_without_client_certificate_is_bad_certificate() {
    // GIVEN: a mutual endpoint and a client without an identity
    let setup = Setup::new();
    let negotiator = setup.mutual();
    let connector = setup.connector(None);

    // WHEN: the client handshakes
    let (server, _client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: the server rejects while waiting for the client certificate
    let err = rejection(server);
    assert_eq!(err.rejection, Rejection::BadCertificate);
    assert_eq!(err.failed_in, Phase::AwaitClientCertificate);
    assert_eq!(err.rejection.alert().map(u8::from), Some(42));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario C: mutual TLS, certificate from an unknown CA
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutual_tls_with_untrusted_issuer_is_handshake_failure() {
    // GIVEN: a client certificate issued by a CA the gateway does not trust
    let setup = Setup::new();
    let negotiator = setup.mutual();
    let rogue = Pki::new("Rogue CA").identity("intruder", &["client.local"]);
    let connector = setup.connector(Some(&rogue));

    // WHEN: the client handshakes
    let (server, _client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: handshake_failure carrying untrusted-issuer
    let err = rejection(server);
    assert_eq!(
        err.rejection,
        Rejection::HandshakeFailure(FailureCause::Chain(RejectReason::UntrustedIssuer))
    );
    assert_eq!(err.failed_in, Phase::AwaitClientCertificate);
    assert_eq!(err.rejection.alert().map(u8::from), Some(40));
}

#[tokio::test]
async fn mutual_tls_with_look_alike_issuer_is_signature_mismatch() {
    // GIVEN: an impostor CA that copies the trusted CA's name
    let setup = Setup::new();
    let negotiator = setup.mutual();
    let impostor = Pki::new("Gateway Client CA").identity("intruder", &["client.local"]);
    let connector = setup.connector(Some(&impostor));

    // WHEN: the client handshakes
    let (server, _client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: the chain anchors by name but fails signature verification
    let err = rejection(server);
    assert_eq!(
        err.rejection,
        Rejection::HandshakeFailure(FailureCause::Chain(RejectReason::SignatureMismatch))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario D: mutual TLS with valid chains on both sides
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutual_tls_with_trusted_client_is_established() {
    // GIVEN: a mutual endpoint and a client holding a certificate from the trusted CA
    let setup = Setup::new();
    let negotiator = setup.mutual();
    let client_identity = setup.client_identity("billing-client");
    let connector = setup.connector(Some(&client_identity));

    // WHEN: both sides handshake
    let (server, client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: the session is established and the client identity is visible
    let mut channel = server.unwrap();
    let mut client = client.unwrap();
    assert_eq!(channel.session().phase(), &Phase::Established);
    assert!(channel.session().is_established());
    assert!(channel.session().cipher_suite().is_some());
    assert_eq!(channel.session().server_name(), Some("localhost"));
    assert_eq!(channel.session().peer_certificate_chain().map(<[_]>::len), Some(1));
    assert_eq!(
        channel.peer_identity().map(|c| c.display_name()),
        Some("billing-client".to_string())
    );

    // AND: application data flows through the demo responder
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let server_task = tokio::spawn(async move {
        HelloResponder.handle(&mut channel).await.unwrap();
        channel.close().await;
        channel
    });
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let mut channel = server_task.await.unwrap();

    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("Hello, billing-client!\n"));

    // AND: once closed, the channel refuses further traffic
    assert!(matches!(channel.write(b"late").await, Err(ChannelError::Closed)));
    assert!(matches!(channel.read().await, Err(ChannelError::Closed)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Further client-certificate rejections
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutual_tls_with_expired_client_certificate_is_certificate_expired() {
    // GIVEN: a client certificate from the trusted CA that expired in 2021
    let setup = Setup::new();
    let negotiator = setup.mutual();
    let bundle = setup.client_pki.expired_bundle("old-client", &["client.local"]);
    let expired = keystore::load_identity(bundle.as_bytes(), None).unwrap();
    let connector = setup.connector(Some(&expired));

    // WHEN: the client handshakes
    let (server, _client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: certificate_expired
    let err = rejection(server);
    assert_eq!(err.rejection, Rejection::CertificateExpired);
    assert_eq!(err.rejection.chain_reason(), Some(RejectReason::Expired));
    assert_eq!(err.rejection.alert().map(u8::from), Some(45));
}

#[tokio::test]
async fn client_name_constraint_rejects_other_clients() {
    // GIVEN: a mutual endpoint that only admits clients named billing.internal
    let setup = Setup::new();
    let config = tls_gateway::config::TlsConfig {
        enabled: true,
        client_auth_required: true,
        client_names: vec!["billing.internal".to_string()],
        ..Default::default()
    };
    let decision =
        tls_gateway::policy::decide(&config, Some(setup.client_pki.anchors())).unwrap();
    let negotiator = Negotiator::new(decision, Some(&setup.server_identity), fast_timeouts()).unwrap();
    let other = setup.client_pki.identity("reports", &["reports.internal"]);
    let connector = setup.connector(Some(&other));

    // WHEN: a trusted client with a different name connects
    let (server, _client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: name-mismatch
    let err = rejection(server);
    assert_eq!(
        err.rejection,
        Rejection::HandshakeFailure(FailureCause::Chain(RejectReason::NameMismatch))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Client role: verifying the server
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn client_rejects_server_with_wrong_name() {
    // GIVEN: a client dialling a name the server certificate does not carry
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let connector = setup.connector(None);

    // WHEN: the client handshakes
    let (server, client) = handshake(&negotiator, &connector, "api.example.com").await;

    // THEN: the client refuses with name-mismatch and the server sees the alert
    let err = client.unwrap_err();
    assert_eq!(
        err,
        ConnectError::Rejected(Rejection::HandshakeFailure(FailureCause::Chain(
            RejectReason::NameMismatch
        )))
    );
    assert!(server.is_err());
}

#[tokio::test]
async fn client_rejects_server_from_unknown_ca() {
    // GIVEN: a client that trusts a different CA than the one that issued the server
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let other = Pki::new("Other CA");
    let connector = Connector::new(other.anchors(), None, true).unwrap();

    // WHEN: the client handshakes
    let (_server, client) = handshake(&negotiator, &connector, "localhost").await;

    // THEN: untrusted-issuer
    assert_eq!(
        client.unwrap_err(),
        ConnectError::Rejected(Rejection::HandshakeFailure(FailureCause::Chain(
            RejectReason::UntrustedIssuer
        )))
    );
}

#[tokio::test]
async fn hostname_check_can_be_disabled() {
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let connector = Connector::new(setup.server_pki.anchors(), None, false).unwrap();

    let (server, client) = handshake(&negotiator, &connector, "api.example.com").await;
    assert!(server.is_ok());
    assert!(client.is_ok());
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutual handshake phases past the client certificate
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutual_client_silent_after_hello_times_out_awaiting_certificate() {
    // GIVEN: a mutual endpoint with a short client-certificate deadline
    let setup = Setup::new();
    let timeouts = PhaseTimeouts {
        client_certificate: Duration::from_millis(200),
        ..fast_timeouts()
    };
    let negotiator = setup.negotiator(true, true, timeouts);
    let (server_io, client_io) = duplex(64 * 1024);

    // WHEN: the client sends its ClientHello and then nothing else
    let config = Arc::new(setup.client_config(Some("slow-client")));
    let (server, ()) = tokio::join!(negotiator.negotiate(server_io, 6), async move {
        let mut io = client_io;
        let mut conn = ClientConnection::new(config, ServerName::try_from("localhost").unwrap()).unwrap();
        let mut hello = Vec::new();
        conn.write_tls(&mut hello).unwrap();
        io.write_all(&hello).await.unwrap();
        // Hold the transport open until the server gives up
        let mut rest = Vec::new();
        let _ = io.read_to_end(&mut rest).await;
    });

    // THEN: timed out while waiting for the client certificate
    let err = rejection(server);
    assert_eq!(err.rejection, Rejection::TimedOut);
    assert_eq!(err.failed_in, Phase::AwaitClientCertificate);
}

#[tokio::test]
async fn corrupted_client_finished_is_decrypt_error_in_key_exchange() {
    // GIVEN: a mutual endpoint and a trusted client driven record by record
    let setup = Setup::new();
    let negotiator = setup.mutual();
    let (server_io, client_io) = duplex(64 * 1024);
    let mut config = setup.client_config(Some("billing-client"));
    // Small records keep Finished apart from the certificate messages
    config.max_fragment_size = Some(32);
    let config = Arc::new(config);

    // WHEN: the client's final flight arrives with its last byte flipped
    let (server, ()) = tokio::join!(negotiator.negotiate(server_io, 7), async move {
        let mut io = client_io;
        let mut conn = ClientConnection::new(config, ServerName::try_from("localhost").unwrap()).unwrap();
        let mut out = Vec::new();
        conn.write_tls(&mut out).unwrap();
        io.write_all(&out).await.unwrap();

        let mut buf = vec![0u8; 16 * 1024];
        while conn.is_handshaking() {
            let n = io.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed before its flight completed");
            let mut incoming = &buf[..n];
            while !incoming.is_empty() {
                conn.read_tls(&mut incoming).unwrap();
                conn.process_new_packets().unwrap();
            }
        }

        let mut flight = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut flight).unwrap();
        }
        *flight.last_mut().unwrap() ^= 0x01;
        io.write_all(&flight).await.unwrap();
        let mut rest = Vec::new();
        let _ = io.read_to_end(&mut rest).await;
    });

    // THEN: the chain was accepted, so the failure belongs to key exchange
    let err = rejection(server);
    assert_eq!(err.rejection, Rejection::DecryptError);
    assert_eq!(err.failed_in, Phase::KeyExchange);
    assert_eq!(err.rejection.alert().map(u8::from), Some(51));
}

// ─────────────────────────────────────────────────────────────────────────────
// Plaintext, timeouts and broken peers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plaintext_mode_skips_tls() {
    // GIVEN: TLS disabled
    let setup = Setup::new();
    let negotiator = setup.negotiator(false, false, fast_timeouts());
    let (server_io, mut client_io) = duplex(4096);

    // WHEN: the connection is negotiated
    let mut channel = negotiator.negotiate(server_io, 9).await.unwrap();

    // THEN: the channel is open in plaintext
    assert_eq!(channel.session().phase(), &Phase::PlaintextOpen);
    assert!(!channel.is_encrypted());
    client_io.write_all(b"hello").await.unwrap();
    assert_eq!(&channel.read().await.unwrap()[..], b"hello");
}

#[tokio::test]
async fn silent_client_times_out_waiting_for_hello() {
    // GIVEN: a short hello deadline
    let setup = Setup::new();
    let timeouts = PhaseTimeouts {
        client_hello: Duration::from_millis(100),
        ..fast_timeouts()
    };
    let negotiator = setup.negotiator(true, false, timeouts);
    let (server_io, _client_io) = duplex(4096);

    // WHEN: the client never sends anything
    let err = negotiator.negotiate(server_io, 2).await.unwrap_err();

    // THEN: timed out in AwaitClientHello
    assert_eq!(err.rejection, Rejection::TimedOut);
    assert_eq!(err.failed_in, Phase::AwaitClientHello);
    assert_eq!(err.rejection.alert(), None);
}

#[tokio::test]
async fn client_closing_before_hello_is_connection_closed() {
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let (server_io, client_io) = duplex(4096);
    drop(client_io);

    let err = negotiator.negotiate(server_io, 3).await.unwrap_err();
    assert_eq!(err.rejection, Rejection::ConnectionClosed);
    assert_eq!(err.failed_in, Phase::AwaitClientHello);
}

#[tokio::test]
async fn plaintext_request_to_tls_endpoint_is_rejected() {
    // GIVEN: a TLS endpoint
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let (server_io, mut client_io) = duplex(4096);

    // WHEN: a plaintext HTTP request arrives
    client_io
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let err = negotiator.negotiate(server_io, 4).await.unwrap_err();

    // THEN: the handshake fails; anything sent back is a TLS alert record
    assert!(matches!(err.rejection, Rejection::HandshakeFailure(FailureCause::Protocol(_))));
    assert_eq!(err.failed_in, Phase::AwaitClientHello);
    let mut reply = Vec::new();
    client_io.read_to_end(&mut reply).await.unwrap();
    if let Some(content_type) = reply.first() {
        assert_eq!(*content_type, 0x15, "expected a TLS alert record");
    }
}

#[tokio::test]
async fn tls_close_sends_close_notify() {
    // GIVEN: an established server-auth channel
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let connector = setup.connector(None);
    let (server, client) = handshake(&negotiator, &connector, "localhost").await;
    let mut channel = server.unwrap();
    let mut client = client.unwrap();

    // WHEN: the server closes twice
    channel.close().await;
    channel.close().await;

    // THEN: the client sees a clean end of stream and the channel stays closed
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
    assert!(matches!(channel.read().await, Err(ChannelError::Closed)));
    assert!(matches!(channel.write(b"x").await, Err(ChannelError::Closed)));
}

#[tokio::test]
async fn client_close_ends_server_reads() {
    let setup = Setup::new();
    let negotiator = setup.server_auth();
    let connector = setup.connector(None);
    let (server, client) = handshake(&negotiator, &connector, "localhost").await;
    let mut channel = server.unwrap();
    let mut client = client.unwrap();

    client.shutdown().await.unwrap();
    drop(client);

    assert!(matches!(channel.read().await, Err(ChannelError::Closed)));
}
