//! Dedicated writer task per connection.
//!
//! Every frame leaving a connection goes through one task that owns the socket
//! write half. Dispatch tasks hand it fully encoded frames over an mpsc channel,
//! so frames never interleave on the wire and go out in enqueue order.
//!
//! # Architecture
//!
//! ```text
//! Dispatch 1 ─┐
//! Dispatch 2 ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► TCP write half
//! Dispatch N ─┘
//! ```
//!
//! Frames that are ready together are written with one vectored write.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};

/// Maximum frames to batch in a single write operation.
pub(crate) const MAX_BATCH_SIZE: usize = 64;

/// Handle for sending frames to the writer task.
///
/// Cheap to clone; every dispatch task on the connection holds one.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue an encoded frame, waiting while the queue is full.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Queue an encoded frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RpcError::Protocol("Write queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => RpcError::ConnectionClosed,
        })
    }

    /// Check whether the writer task has gone away.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task on the current `LocalSet`.
///
/// The task ends cleanly once every [`WriterHandle`] is dropped, or with an
/// error on the first failed write. Aborting the returned `JoinHandle` discards
/// whatever is still queued.
///
/// # Panics
///
/// Panics if called outside a `LocalSet`.
pub fn spawn_writer_task<W>(writer: W, capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::task::spawn_local(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        let Some(first) = rx.recv().await else {
            return Ok(());
        };

        batch.clear();
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::debug!(frames = batch.len(), "Write failed: {}", e);
            return Err(e);
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
pub(crate) async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for frame in batch {
        let start = skipped;
        let end = skipped + frame.len();

        if skip_bytes < end && !frame.is_empty() {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&frame[offset..]));
        }
        skipped = end;
    }

    slices
}
