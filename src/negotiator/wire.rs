//! Moving TLS records between a `ServerConnection` and an async stream.

use std::io;

use rustls::ServerConnection;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Bytes read from the transport per step.
pub(crate) const READ_CHUNK: usize = 4096;

/// Feed received bytes into the connection and process every record.
///
/// On error rustls has queued the matching alert; call [`flush`] to send it.
pub(crate) fn feed(conn: &mut ServerConnection, mut incoming: &[u8]) -> Result<(), rustls::Error> {
    while !incoming.is_empty() {
        conn.read_tls(&mut incoming)
            .map_err(|e| rustls::Error::General(format!("buffering TLS records: {e}")))?;
        conn.process_new_packets()?;
    }
    Ok(())
}

/// Write every pending TLS record to the transport.
pub(crate) async fn flush<S>(conn: &mut ServerConnection, io: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(READ_CHUNK);
    while conn.wants_write() {
        out.clear();
        conn.write_tls(&mut out)?;
        io.write_all(&out).await?;
    }
    io.flush().await
}
