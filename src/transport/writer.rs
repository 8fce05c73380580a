//! Dedicated writer task for reply blocks.
//!
//! Replies are produced by continuations that cannot await, so the queue in
//! front of the writer is unbounded. The pending count is tracked so a slow
//! peer shows up in the logs instead of silently growing memory.
//!
//! [`WriterHandle::close`] stops the task even while clones are still held
//! by continuations: queued replies are flushed, later ones are refused with
//! `ConnectionClosed`.
//!
//! ```text
//! Continuation 1 ─┐
//! Continuation 2 ─┼─► mpsc::UnboundedSender<OutboundBlock> ─► Writer Task ─► Stream
//! Continuation N ─┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::ReplySink;
use crate::error::{GlusterError, Result};
use crate::protocol::{Block, HEADER_SIZE, TRAILER, TRAILER_SIZE};

/// Pending reply count above which a warning is logged.
pub const DEFAULT_HIGH_WATER: usize = 1024;

/// Maximum blocks to batch in a single write operation.
pub const MAX_BATCH_SIZE: usize = 64;

/// A block ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundBlock {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundBlock {
    /// Prepare `block` for writing.
    pub fn new(block: &Block) -> Self {
        Self {
            header: block.header().encode(),
            payload: block.payload.clone(),
        }
    }

    /// Total size on the wire (header + payload + trailer).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    fn parts(&self) -> [&[u8]; 3] {
        [&self.header, &self.payload, &TRAILER]
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Pending reply count above which a warning is logged.
    pub high_water: usize,
    /// Maximum blocks coalesced into one vectored write.
    pub max_batch: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            high_water: DEFAULT_HIGH_WATER,
            max_batch: MAX_BATCH_SIZE,
        }
    }
}

/// Handle for queueing blocks to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundBlock>,
    pending: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
    high_water: usize,
}

impl WriterHandle {
    /// Queue a block without waiting.
    pub fn send(&self, block: OutboundBlock) -> Result<()> {
        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if pending == self.high_water {
            tracing::warn!("{} replies pending on slow connection", pending);
        }

        self.tx.send(block).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            GlusterError::ConnectionClosed
        })
    }

    /// Get current pending block count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Check whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the writer task to flush what is queued and stop.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }
}

impl ReplySink for WriterHandle {
    fn send_reply(&self, block: Block) -> Result<()> {
        self.send(OutboundBlock::new(&block))
    }
}

/// Spawn the writer task and return a handle for queueing blocks.
///
/// The task ends cleanly once every handle has been dropped, or once
/// [`WriterHandle::close`] is called, and the queue is drained.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let shutdown = Arc::new(Notify::new());

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        shutdown: shutdown.clone(),
        high_water: config.high_water,
    };
    let task = tokio::spawn(writer_loop(
        rx,
        writer,
        pending,
        shutdown,
        config.max_batch.max(1),
    ));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundBlock>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
    max_batch: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(max_batch);
    let mut closing = false;
    loop {
        let next = if closing {
            rx.recv().await
        } else {
            tokio::select! {
                next = rx.recv() => next,
                _ = shutdown.notified() => {
                    // A closed receiver still yields what was queued.
                    rx.close();
                    closing = true;
                    continue;
                }
            }
        };
        let Some(first) = next else { break };

        batch.push(first);
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(block) => batch.push(block),
                Err(_) => break,
            }
        }

        let count = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(count, Ordering::Release);
        batch.clear();
    }

    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of blocks using scatter/gather I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundBlock]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundBlock::size).sum();
    let mut written = 0;

    while written < total_size {
        let slices = build_remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(GlusterError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[OutboundBlock], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for part in batch.iter().flat_map(OutboundBlock::parts) {
        let end = offset + part.len();
        if !part.is_empty() && skip_bytes < end {
            slices.push(IoSlice::new(&part[skip_bytes.saturating_sub(offset)..]));
        }
        offset = end;
    }

    slices
}
