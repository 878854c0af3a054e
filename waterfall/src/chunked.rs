//! Chunked uploads through fixed-shape protocol messages.
//!
//! A [`ChunkWriter`] turns a [`CallSender`] into a byte sink: each chunk of
//! at most `chunk_size` bytes is copied into a freshly built message by a
//! [`PayloadCarrier`] and sent. The carrier is the only thing that differs
//! between echo, push, exec stdin and install uploads.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use waterfall_proto::{CmdProgress, InstallRequest, Message, Transfer};

use crate::Result;
use crate::call::CallSender;

/// Knows how to carry a byte chunk in one message variant.
pub trait PayloadCarrier {
    /// Message type carrying the chunks.
    type Message: Serialize;

    /// Builds an empty message of the right variant.
    fn build(&self) -> Self::Message;

    /// Installs `chunk` as the message's payload.
    fn set_payload(&self, msg: &mut Self::Message, chunk: Vec<u8>);
}

/// Carries echo bytes in [`Message::payload`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoCarrier;

impl PayloadCarrier for EchoCarrier {
    type Message = Message;

    fn build(&self) -> Message {
        Message::default()
    }

    fn set_payload(&self, msg: &mut Message, chunk: Vec<u8>) {
        msg.payload = chunk;
    }
}

/// Carries tar bytes in [`Transfer::payload`], tagged with the destination.
#[derive(Debug, Clone)]
pub struct TransferCarrier {
    /// Destination directory on the device.
    pub path: String,
}

impl PayloadCarrier for TransferCarrier {
    type Message = Transfer;

    fn build(&self) -> Transfer {
        Transfer::path(self.path.clone())
    }

    fn set_payload(&self, msg: &mut Transfer, chunk: Vec<u8>) {
        msg.payload = chunk;
    }
}

/// Carries process input in [`CmdProgress::stdin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinCarrier;

impl PayloadCarrier for StdinCarrier {
    type Message = CmdProgress;

    fn build(&self) -> CmdProgress {
        CmdProgress::default()
    }

    fn set_payload(&self, msg: &mut CmdProgress, chunk: Vec<u8>) {
        msg.stdin = Some(chunk);
    }
}

/// Carries package bytes in [`InstallRequest::payload`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallCarrier;

impl PayloadCarrier for InstallCarrier {
    type Message = InstallRequest;

    fn build(&self) -> InstallRequest {
        InstallRequest::default()
    }

    fn set_payload(&self, msg: &mut InstallRequest, chunk: Vec<u8>) {
        msg.payload = chunk;
    }
}

/// Byte sink that sends bounded chunks over a call.
#[derive(Debug)]
pub struct ChunkWriter<C: PayloadCarrier> {
    /// Outbound half of the call.
    tx: CallSender<C::Message>,
    /// Message builder for this call's variant.
    carrier: C,
    /// Largest payload per message.
    chunk_size: usize,
    /// Total bytes sent so far.
    written: u64,
}

impl<C: PayloadCarrier> ChunkWriter<C> {
    /// Wraps `tx`. A `chunk_size` of zero is treated as one.
    pub fn new(tx: CallSender<C::Message>, carrier: C, chunk_size: usize) -> Self {
        Self {
            tx,
            carrier,
            chunk_size: chunk_size.max(1),
            written: 0,
        }
    }

    /// Sends `buf` as one or more messages. Empty input sends nothing.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        for chunk in buf.chunks(self.chunk_size) {
            let mut msg = self.carrier.build();
            self.carrier.set_payload(&mut msg, chunk.to_vec());
            self.tx.send(msg).await?;
            self.written += chunk.len() as u64;
        }
        Ok(())
    }

    /// Forwards everything `r` yields until end-of-stream, one read per
    /// message. Returns the number of bytes copied.
    ///
    /// Dropping the returned future cancels the pending read.
    pub async fn copy_from<R>(&mut self, r: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut copied = 0u64;
        loop {
            let n = r.read(&mut buf).await?;
            if n == 0 {
                return Ok(copied);
            }
            self.write(&buf[..n]).await?;
            copied += n as u64;
        }
    }

    /// Total bytes sent through this writer.
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Half-closes the underlying call.
    pub async fn close_send(&mut self) -> Result<()> {
        self.tx.close_send().await
    }

    /// Returns the underlying sender.
    pub fn into_inner(self) -> CallSender<C::Message> {
        self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;

    /// Connects a writer to a receiving call over an in-memory stream.
    fn pair<C: PayloadCarrier>(
        carrier: C,
        chunk_size: usize,
    ) -> (ChunkWriter<C>, crate::call::CallReceiver<C::Message>)
    where
        C::Message: serde::de::DeserializeOwned,
    {
        let (a, b) = tokio::io::duplex(1 << 20);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let local = Call::<C::Message, C::Message>::from_parts(ar, aw);
        let remote = Call::<C::Message, C::Message>::from_parts(br, bw);
        (ChunkWriter::new(local.tx, carrier, chunk_size), remote.rx)
    }

    #[tokio::test]
    async fn splits_into_bounded_chunks() {
        let (mut w, mut rx) = pair(EchoCarrier, 4);
        w.write(b"0123456789").await.unwrap();
        w.close_send().await.unwrap();
        assert_eq!(w.written(), 10);

        let mut sizes = Vec::new();
        let mut all = Vec::new();
        while let Some(m) = rx.recv().await.unwrap() {
            sizes.push(m.payload.len());
            all.extend(m.payload);
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(all, b"0123456789");
    }

    #[tokio::test]
    async fn empty_write_sends_nothing() {
        let (mut w, mut rx) = pair(EchoCarrier, 8);
        w.write(&[]).await.unwrap();
        w.close_send().await.unwrap();
        assert!(rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stdin_chunks_only_set_stdin() {
        let (mut w, mut rx) = pair(StdinCarrier, 3);
        let mut src: &[u8] = b"hello";
        let n = w.copy_from(&mut src).await.unwrap();
        w.close_send().await.unwrap();
        assert_eq!(n, 5);

        let mut got = Vec::new();
        while let Some(p) = rx.recv().await.unwrap() {
            assert!(p.cmd.is_none() && p.stdout.is_none() && p.exit_code.is_none());
            got.extend(p.stdin.unwrap());
        }
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn transfer_chunks_carry_destination() {
        let (mut w, mut rx) = pair(
            TransferCarrier {
                path: "/sdcard/dst".into(),
            },
            2,
        );
        w.write(b"abc").await.unwrap();
        w.close_send().await.unwrap();

        while let Some(t) = rx.recv().await.unwrap() {
            assert_eq!(t.path, "/sdcard/dst");
        }
    }
}
