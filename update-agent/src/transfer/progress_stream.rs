//! Byte-counting wrapper around a download body stream.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Invoked with the size of every chunk as it arrives
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Stream wrapper that reports raw (still encoded) bytes received
pub struct ProgressStream<S> {
    inner: S,
    bytes_transferred: u64,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_transferred: 0,
            callback,
        }
    }

    /// Get total bytes transferred
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);

        if let Poll::Ready(Some(Ok(bytes))) = &poll {
            let chunk_size = bytes.len() as u64;
            self.bytes_transferred += chunk_size;
            (self.callback)(chunk_size);
        }

        poll
    }
}
