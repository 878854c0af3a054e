//! Push and pull handlers: tar streams in and out of the device filesystem.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use waterfall::archive;
use waterfall::{
    Call, CallReceiver, ChunkWriter, DEFAULT_PIPE_CAPACITY, Error, PipeWriter, Result,
    TransferCarrier, pipe,
};
use waterfall_proto::{ErrorInfo, TRANSFER_CHUNK_SIZE, Transfer, TransferAck};

/// Receives a tar stream and extracts it into the directory named by the
/// first fragment, then answers with a [`TransferAck`].
pub(crate) async fn push(call: Call<TransferAck, Transfer>) -> Result<()> {
    let (mut tx, mut rx) = call.split();
    let Some(first) = rx.recv().await? else {
        return Err(Error::Protocol("push carried no archive".into()));
    };

    let dst = PathBuf::from(&first.path);
    let (sink, source) = pipe(DEFAULT_PIPE_CAPACITY);
    let source = source.into_blocking();
    let target = dst.clone();
    let decoder = tokio::task::spawn_blocking(move || archive::untar(source, &target));

    let received = receive_archive(&mut rx, sink, first.payload).await;
    let decoded = decoder.await?;
    received?;

    let ack = match decoded {
        Ok(()) => {
            debug!(dst = %dst.display(), "push extracted");
            TransferAck {
                success: true,
                err: String::new(),
            }
        }
        Err(e) => {
            warn!(dst = %dst.display(), error = %e, "push failed");
            TransferAck {
                success: false,
                err: format!("extract into {}: {e}", dst.display()),
            }
        }
    };
    tx.send(ack).await?;
    tx.close_send().await
}

/// Feeds fragment payloads to the decoder until the host half-closes.
///
/// Once the decoder stops reading, the rest of the stream is discarded so
/// the host still reaches its acknowledgement.
async fn receive_archive(
    rx: &mut CallReceiver<Transfer>,
    sink: PipeWriter,
    first: Vec<u8>,
) -> Result<()> {
    let mut sink = Some(sink);
    let mut pending = Some(first);
    loop {
        let payload = match pending.take() {
            Some(payload) => payload,
            None => match rx.recv().await? {
                Some(fragment) => fragment.payload,
                None => break,
            },
        };
        if let Some(w) = sink.as_mut()
            && w.write_all(&payload).await.is_err()
        {
            sink = None;
        }
    }
    if let Some(w) = sink {
        w.close().await?;
    }
    Ok(())
}

/// Streams `src` as a tar archive of [`Transfer`] fragments.
///
/// An encoder failure after streaming started is reported with an abort
/// frame so the host does not mistake a truncated archive for a complete
/// one.
pub(crate) async fn pull(call: Call<Transfer, ()>, src: String) -> Result<()> {
    let (tx, _rx) = call.split();
    let (sink, mut source) = pipe(DEFAULT_PIPE_CAPACITY);

    let mut sink = sink.into_blocking();
    let path = PathBuf::from(&src);
    let encoder = tokio::task::spawn_blocking(move || {
        let encoded = archive::tar_path(&mut sink, &path);
        let closed = sink.shutdown();
        encoded.and(closed)
    });

    let mut writer = ChunkWriter::new(tx, TransferCarrier { path: src }, TRANSFER_CHUNK_SIZE);
    let sent = writer.copy_from(&mut source).await;
    drop(source);
    let encoded = encoder.await?;

    let mut tx = writer.into_inner();
    match (encoded, sent) {
        (_, Err(e)) => Err(e),
        (Err(e), Ok(_)) => {
            warn!(error = %e, "pull encoding failed");
            tx.abort(ErrorInfo::internal(e.to_string())).await
        }
        (Ok(()), Ok(bytes)) => {
            debug!(bytes, "pull streamed");
            tx.close_send().await
        }
    }
}
