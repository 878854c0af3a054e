//! Streaming calls over a framed byte stream.
//!
//! A [`Connector`] produces one fresh byte stream per call. [`Call::open`]
//! performs the [`Hello`] handshake and hands back typed halves: a
//! [`CallSender`] for outbound messages and a [`CallReceiver`] for inbound
//! ones. Each half is closed when dropped; [`CallSender::close_send`]
//! half-closes explicitly so the peer sees end-of-stream while the receive
//! side stays open.

use std::fmt;
use std::future::Future;
use std::io;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;
use waterfall_proto::{ErrorInfo, Frame, Hello, HelloAck};

use crate::{Error, Result};

/// Opens byte streams to the device, one per call.
pub trait Connector: Send + Sync {
    /// Stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connects a new stream.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects to an agent listening on a Unix socket (e.g. a vsock or QEMU
/// pipe forwarded to the host).
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    /// Socket path.
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    /// Creates a connector for the socket at `path`.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
impl Connector for UnixConnector {
    type Stream = tokio::net::UnixStream;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send {
        tokio::net::UnixStream::connect(self.path.clone())
    }
}

/// Connects to an agent over TCP (e.g. a forwarded emulator port).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// `host:port` address.
    addr: String,
}

impl TcpConnector {
    /// Creates a connector for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = tokio::net::TcpStream;

    async fn connect(&self) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Outbound half of a call.
pub struct CallSender<T> {
    /// Write half of the call stream.
    w: Box<dyn AsyncWrite + Send + Unpin>,
    /// Set once the write side has been shut down.
    closed: bool,
    /// Message type marker.
    _msg: PhantomData<fn(T)>,
}

impl<T> fmt::Debug for CallSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSender")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize> CallSender<T> {
    /// Wraps the write half of a call stream.
    pub fn new(w: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            w: Box::new(w),
            closed: false,
            _msg: PhantomData,
        }
    }

    /// Sends one message. Blocks while the transport applies backpressure.
    pub async fn send(&mut self, msg: T) -> Result<()> {
        self.send_frame(&Frame::Data(msg)).await
    }

    /// Fails the call on the peer's side and closes the write side.
    pub async fn abort(&mut self, info: ErrorInfo) -> Result<()> {
        self.send_frame(&Frame::<T>::Abort(info)).await?;
        self.close_send().await
    }

    /// Signals "no more sends". Idempotent.
    pub async fn close_send(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.w.shutdown().await.map_err(Error::from_send)
    }

    /// Encodes and writes one frame.
    async fn send_frame(&mut self, frame: &Frame<T>) -> Result<()> {
        if self.closed {
            return Err(Error::Protocol("send after close".into()));
        }
        waterfall_proto::send(&mut self.w, frame)
            .await
            .map_err(Error::from_send)
    }
}

/// Inbound half of a call.
pub struct CallReceiver<T> {
    /// Read half of the call stream.
    r: Box<dyn AsyncRead + Send + Unpin>,
    /// Set once end-of-stream or an abort was seen.
    done: bool,
    /// Message type marker.
    _msg: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for CallReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallReceiver")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> CallReceiver<T> {
    /// Wraps the read half of a call stream. Pass a buffered reader.
    pub fn new(r: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            r: Box::new(r),
            done: false,
            _msg: PhantomData,
        }
    }

    /// Receives the next message, or `None` once the peer closed its side.
    ///
    /// A [`Frame::Abort`] from the peer becomes [`Error::Remote`].
    pub async fn recv(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        match waterfall_proto::recv::<Frame<T>, _>(&mut self.r).await? {
            Some(Frame::Data(msg)) => Ok(Some(msg)),
            Some(Frame::Abort(info)) => {
                self.done = true;
                Err(Error::Remote(info))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Half-closes `tx` and reads the single final message of a
/// client-streaming call.
pub async fn close_and_recv<S, R>(tx: &mut CallSender<S>, rx: &mut CallReceiver<R>) -> Result<R>
where
    S: Serialize,
    R: DeserializeOwned,
{
    tx.close_send().await?;
    rx.recv()
        .await?
        .ok_or_else(|| Error::Protocol("call ended without a final response".into()))
}

/// An open call sending `S` and receiving `R`.
#[derive(Debug)]
pub struct Call<S, R> {
    /// Outbound half.
    pub tx: CallSender<S>,
    /// Inbound half.
    pub rx: CallReceiver<R>,
}

impl<S: Serialize, R: DeserializeOwned> Call<S, R> {
    /// Connects a new stream and opens `hello` on it.
    ///
    /// Fails with [`Error::Remote`] if the device refuses the call.
    pub async fn open<C: Connector>(connector: &C, hello: Hello) -> Result<Self> {
        let name = hello.name();
        let stream = connector.connect().await?;
        let (r, mut w) = tokio::io::split(stream);
        let mut r = BufReader::new(r);

        waterfall_proto::send(&mut w, &hello)
            .await
            .map_err(Error::from_send)?;
        match waterfall_proto::recv::<HelloAck, _>(&mut r).await? {
            Some(HelloAck::Ready) => {}
            Some(HelloAck::Error(info)) => return Err(Error::Remote(info)),
            None => {
                return Err(Error::Protocol(format!(
                    "connection closed while opening {name} call"
                )));
            }
        }
        debug!(call = name, "call opened");

        Ok(Self::from_parts(r, w))
    }

    /// Builds a call over an already negotiated stream.
    pub fn from_parts(
        r: impl AsyncRead + Send + Unpin + 'static,
        w: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            tx: CallSender::new(w),
            rx: CallReceiver::new(r),
        }
    }

    /// Splits the call into its halves.
    pub fn split(self) -> (CallSender<S>, CallReceiver<R>) {
        (self.tx, self.rx)
    }

    /// Half-closes and reads the final aggregate message.
    pub async fn close_and_recv(mut self) -> Result<R> {
        close_and_recv(&mut self.tx, &mut self.rx).await
    }
}
