//! Host-side client for driving a remote device over streaming calls.
//!
//! `waterfall` talks to an agent running on the device (emulator or
//! hardware) and offers five operations: echo, push, pull, exec and
//! install. Each operation opens its own call, a framed byte stream
//! negotiated by a [`Hello`] handshake, and runs its concurrent pieces
//! (archive encoder or decoder, call sender, call receiver) as units of a
//! [`TaskGroup`] joined by bounded [`pipe`]s.
//!
//! # Quick start
//!
//! ```no_run
//! use waterfall::{Client, Stdio, UnixConnector};
//!
//! # async fn demo() -> waterfall::Result<()> {
//! let client = Client::new(UnixConnector::new("/tmp/waterfall.sock"));
//!
//! // Push a directory tree, then inspect it.
//! client.push("./fixtures", "/data/local/tmp").await?;
//! let mut listing = Vec::new();
//! client
//!     .exec("ls", ["-R", "/data/local/tmp/fixtures"], Stdio::new().stdout(&mut listing))
//!     .await?;
//!
//! // Pull a single file into memory.
//! let mut props = Vec::new();
//! client.pull_bytes(&mut props, "/system/build.prop").await?;
//! # Ok(())
//! # }
//! ```
//!
//! The building blocks are public so an agent can share them: [`archive`]
//! holds the tar codec, [`Call`] the framed call halves.

pub mod archive;
mod call;
mod chunked;
mod client;
mod config;
mod error;
mod group;
mod pipe;
#[cfg(test)]
mod testing;

#[cfg(unix)]
pub use call::UnixConnector;
pub use call::{Call, CallReceiver, CallSender, Connector, TcpConnector, close_and_recv};
pub use chunked::{
    ChunkWriter, EchoCarrier, InstallCarrier, PayloadCarrier, StdinCarrier, TransferCarrier,
};
pub use client::{Client, Stdio};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use group::TaskGroup;
pub use pipe::{DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe};
pub use waterfall_proto::{Cmd, ErrorCode, ErrorInfo, Hello};
