//! In-process byte pipe between a producer task and a consumer task.
//!
//! The pipe holds at most `capacity` bytes: a write blocks until the reader
//! drains enough of the buffer. That bound is what lets an archive encoder
//! and a call sender run side by side without staging the whole payload.
//!
//! Closing the write end ([`PipeWriter::close`] or drop) gives the reader
//! end-of-stream once the buffer is drained. Dropping the read end makes
//! pending and later writes fail with [`io::ErrorKind::BrokenPipe`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_util::io::SyncIoBridge;

/// Default buffer size for transfer pipes.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Creates a pipe holding at most `capacity` bytes in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (w, r) = tokio::io::duplex(capacity.max(1));
    (PipeWriter { inner: w }, PipeReader { inner: r })
}

/// Write end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    /// Only the write direction of this stream is used.
    inner: DuplexStream,
}

impl PipeWriter {
    /// Closes the write end; the reader sees end-of-stream after draining.
    pub async fn close(mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    /// Adapts the write end for a synchronous producer.
    ///
    /// Must be called from within a tokio runtime; the returned writer must
    /// then be used from a blocking thread (e.g. `spawn_blocking`).
    pub fn into_blocking(self) -> SyncIoBridge<Self> {
        SyncIoBridge::new(self)
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Read end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    /// Only the read direction of this stream is used.
    inner: DuplexStream,
}

impl PipeReader {
    /// Closes the read end; the writer's next write fails.
    pub fn close(self) {
        drop(self);
    }

    /// Adapts the read end for a synchronous consumer.
    ///
    /// Must be called from within a tokio runtime; the returned reader must
    /// then be used from a blocking thread (e.g. `spawn_blocking`).
    pub fn into_blocking(self) -> SyncIoBridge<Self> {
        SyncIoBridge::new(self)
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn closing_writer_unblocks_pending_read() {
        let (w, mut r) = pipe(16);

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            r.read(&mut buf).await.unwrap()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        w.close().await.unwrap();
        let n = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("read still blocked after close")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn dropping_writer_is_end_of_stream() {
        let (mut w, mut r) = pipe(16);
        w.write_all(b"tail").await.unwrap();
        drop(w);

        let mut got = Vec::new();
        r.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"tail");
    }

    #[tokio::test]
    async fn write_blocks_until_reader_drains() {
        let (mut w, mut r) = pipe(4);

        let writer = tokio::spawn(async move {
            w.write_all(b"0123456789").await.unwrap();
            w.close().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished(), "writer ran past the pipe capacity");

        let mut got = Vec::new();
        r.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"0123456789");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_reader_fails_writer() {
        let (mut w, r) = pipe(4);
        r.close();
        let err = w.write_all(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_producer_feeds_async_consumer() {
        let (w, mut r) = pipe(8);
        let mut w = w.into_blocking();
        let producer = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            for i in 0..100u8 {
                w.write_all(&[i; 10]).unwrap();
            }
            w.shutdown().unwrap();
        });

        let mut got = Vec::new();
        r.read_to_end(&mut got).await.unwrap();
        producer.await.unwrap();
        assert_eq!(got.len(), 1000);
        assert_eq!(got[999], 99);
    }
}
