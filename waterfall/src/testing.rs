//! In-process fakes for exercising calls without a device.

use std::future::Future;
use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{BufReader, DuplexStream};
use waterfall_proto::{Hello, HelloAck};

use crate::call::{Call, Connector};

/// Connector that serves each new stream with a scripted fake device.
pub(crate) struct FnConnector<F> {
    /// Per-connection device behaviour.
    serve: F,
}

impl<F> FnConnector<F> {
    /// Wraps `serve`, which is spawned once per connection.
    pub(crate) const fn new(serve: F) -> Self {
        Self { serve }
    }
}

impl<F, Fut> Connector for FnConnector<F>
where
    F: Fn(DuplexStream) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        let (client, device) = tokio::io::duplex(64 * 1024);
        tokio::spawn((self.serve)(device));
        Ok(client)
    }
}

/// Device side of the handshake: reads the [`Hello`] and accepts it.
pub(crate) async fn accept<S, R>(stream: DuplexStream) -> (Hello, Call<S, R>)
where
    S: Serialize,
    R: DeserializeOwned,
{
    let (r, mut w) = tokio::io::split(stream);
    let mut r = BufReader::new(r);
    let hello = waterfall_proto::recv(&mut r)
        .await
        .unwrap()
        .expect("client sent no hello");
    waterfall_proto::send(&mut w, &HelloAck::Ready).await.unwrap();
    (hello, Call::from_parts(r, w))
}
