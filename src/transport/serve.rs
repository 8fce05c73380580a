//! Read loop driving one connection over a byte stream.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use super::writer::{spawn_writer_task, WriterConfig};
use crate::error::{GlusterError, Result};
use crate::protocol::BlockBuffer;
use crate::server::{Connection, Server};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Serve requests from `stream` until the peer closes it.
///
/// Replies still queued when the peer closes are flushed before returning.
/// Requests still running get no reply: their late replies are refused and
/// logged. A framing error closes the connection.
pub async fn serve_connection<S>(server: &Server, stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, write_half) = tokio::io::split(stream);
    let (writer, mut writer_task) = spawn_writer_task(write_half, WriterConfig::default());
    let conn = server.connection(Arc::new(writer.clone()));

    let result = read_loop(reader, &conn, server.config().max_payload_size).await;
    let released = conn.shutdown();
    drop(conn);

    if let Err(e) = &result {
        tracing::warn!("connection closed: {}", e);
    }
    tracing::debug!("connection done, {} fd(s) released", released);

    writer.close();
    let drain = server.config().drain_timeout;
    match tokio::time::timeout(drain, &mut writer_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!("writer error: {}", e),
        Ok(Err(e)) => tracing::error!("writer task failed: {}", e),
        Err(_) => {
            tracing::warn!(
                "{} repl(ies) not flushed after {:?}, dropping writer",
                writer.pending_count(),
                drain
            );
            writer_task.abort();
        }
    }
    result
}

async fn read_loop<R>(mut reader: R, conn: &Connection, max_payload_size: u32) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut blocks = BlockBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                if blocks.has_partial() {
                    return Err(GlusterError::ConnectionClosed);
                }
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => return Err(GlusterError::Io(e)),
        };

        for block in blocks.push(&buf[..n])? {
            conn.handle_request(block);
        }
    }
}
