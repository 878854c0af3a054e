//! Error types for waterfall operations.

use waterfall_proto::ErrorInfo;

/// Alias for `Result<T, waterfall::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by waterfall operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The device refused the call or aborted it mid-stream.
    #[error("remote error: {0}")]
    Remote(ErrorInfo),

    /// The device hung up while we were still sending.
    #[error("remote closed the call")]
    Disconnected,

    /// The peer sent something the call's protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The device completed a push but reported that it failed.
    #[error("{0}")]
    PushRejected(String),

    /// The installer on the device exited with a non-zero code.
    #[error("install failed with exit code {code}: {output}")]
    InstallFailed {
        /// Installer exit code.
        code: i32,
        /// Captured installer output.
        output: String,
    },

    /// A concurrent unit panicked or was cancelled.
    #[error("transfer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Local or transport I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps a write failure on the call stream, turning "peer went away" into
    /// [`Error::Disconnected`].
    pub(crate) fn from_send(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => Self::Disconnected,
            _ => Self::Io(e),
        }
    }
}
