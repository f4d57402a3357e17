//! Demo HTTP/1.1 responder.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::ChannelHandler;
use crate::channel::{ChannelError, SecureChannel};
use crate::keystore::Certificate;

/// Upper bound on a request head.
const MAX_HEAD: usize = 16 * 1024;

/// Answers every request with `Hello, <peer>!`.
///
/// `<peer>` is the client certificate's display name in mutual mode and
/// `anonymous` otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloResponder;

#[async_trait]
impl ChannelHandler for HelloResponder {
    async fn handle<S>(&self, channel: &mut SecureChannel<S>) -> Result<(), ChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut head = Vec::new();
        while find_head_end(&head).is_none() {
            if head.len() > MAX_HEAD {
                channel.write(&render(431, "Request Header Fields Too Large", "")).await?;
                return Ok(());
            }
            let chunk = channel.read().await?;
            head.extend_from_slice(&chunk);
        }

        let request_line = head
            .split(|b| *b == b'\n')
            .next()
            .map(|line| String::from_utf8_lossy(line).trim_end().to_string())
            .unwrap_or_default();
        let peer = channel
            .peer_identity()
            .map_or_else(|| "anonymous".to_string(), Certificate::display_name);
        debug!(session = channel.session().id(), request = %request_line, peer = %peer, "Request received");

        channel
            .write(&render(200, "OK", &format!("Hello, {peer}!\n")))
            .await?;
        Ok(())
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn render(status: u16, reason: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}
