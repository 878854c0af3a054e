//! Wire protocol for waterfall host↔device calls.
//!
//! Every call runs on its own reliable byte stream (Unix socket, TCP, vsock
//! proxy). The host opens it with a [`Hello`], the device answers with a
//! [`HelloAck`], and from then on both directions carry [`Frame`]s of the
//! call's message type. Messages are serialized with [`postcard`] and framed
//! with a 4-byte big-endian length prefix.
//!
//! Half-closing the write side of the stream is the end-of-stream marker
//! for that direction.

mod codec;
mod message;

pub use codec::{MAX_FRAME, recv, send};
pub use message::{
    Cmd, CmdProgress, ECHO_CHUNK_SIZE, ErrorCode, ErrorInfo, Frame, Hello, HelloAck,
    InstallRequest, InstallResult, Message, TRANSFER_CHUNK_SIZE, Transfer, TransferAck,
};
