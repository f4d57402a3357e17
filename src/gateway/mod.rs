//! Gateway server implementation

mod hello;
mod server;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::channel::{ChannelError, SecureChannel};

pub use hello::HelloResponder;
pub use server::{Gateway, serve_connection, shutdown_signal};

/// Application code that runs on an established channel.
///
/// The gateway closes the channel after `handle` returns.
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    /// Serve one connection.
    async fn handle<S>(&self, channel: &mut SecureChannel<S>) -> Result<(), ChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;
}
