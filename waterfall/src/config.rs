//! Client tuning knobs.

use waterfall_proto::{ECHO_CHUNK_SIZE, MAX_FRAME, TRANSFER_CHUNK_SIZE};

use crate::pipe::DEFAULT_PIPE_CAPACITY;

/// Headroom left in each frame for the message envelope.
const FRAME_OVERHEAD: usize = 4 * 1024;

/// Chunk and buffer sizes used by [`Client`](crate::Client).
///
/// Defaults: 32 KiB echo chunks, 64 KiB transfer/stdin/install chunks and a
/// 64 KiB pipe between archive codec and call.
///
/// # Example
///
/// ```
/// use waterfall::ClientConfig;
///
/// let config = ClientConfig::default()
///     .transfer_chunk_size(256 * 1024)
///     .pipe_capacity(1024 * 1024);
/// assert_eq!(config.transfer_chunk(), 256 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ClientConfig {
    /// Largest echo payload per message.
    echo_chunk: usize,
    /// Largest archive, stdin or install payload per message.
    transfer_chunk: usize,
    /// Bytes in flight between archive codec and call.
    pipe_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            echo_chunk: ECHO_CHUNK_SIZE,
            transfer_chunk: TRANSFER_CHUNK_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Sets the echo chunk size, clamped to what fits in one frame.
    pub const fn echo_chunk_size(mut self, bytes: usize) -> Self {
        self.echo_chunk = clamp_chunk(bytes);
        self
    }

    /// Sets the transfer chunk size, clamped to what fits in one frame.
    pub const fn transfer_chunk_size(mut self, bytes: usize) -> Self {
        self.transfer_chunk = clamp_chunk(bytes);
        self
    }

    /// Sets the pipe capacity (minimum one byte).
    pub const fn pipe_capacity(mut self, bytes: usize) -> Self {
        self.pipe_capacity = if bytes == 0 { 1 } else { bytes };
        self
    }

    /// Echo chunk size in bytes.
    pub const fn echo_chunk(&self) -> usize {
        self.echo_chunk
    }

    /// Transfer chunk size in bytes.
    pub const fn transfer_chunk(&self) -> usize {
        self.transfer_chunk
    }

    /// Pipe capacity in bytes.
    pub const fn pipe(&self) -> usize {
        self.pipe_capacity
    }
}

/// Keeps a chunk size within `1..=MAX_FRAME - FRAME_OVERHEAD`.
const fn clamp_chunk(bytes: usize) -> usize {
    let max = MAX_FRAME as usize - FRAME_OVERHEAD;
    if bytes == 0 {
        1
    } else if bytes > max {
        max
    } else {
        bytes
    }
}
