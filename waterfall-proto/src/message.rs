//! Protocol message types for host↔device calls.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chunk bound for echo payloads.
pub const ECHO_CHUNK_SIZE: usize = 32 * 1024;

/// Chunk bound for archive, stdin and install payloads.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// First message on every connection: names the call being opened.
///
/// The agent answers with exactly one [`HelloAck`]; after
/// [`HelloAck::Ready`] both sides exchange [`Frame`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hello {
    /// Bidirectional echo of [`Message`] fragments.
    Echo,
    /// Client-streaming upload of [`Transfer`] fragments, answered by one
    /// [`TransferAck`].
    Push,
    /// Server-streaming download of `path` as [`Transfer`] fragments.
    Pull(Transfer),
    /// Bidirectional [`CmdProgress`] stream.
    Exec,
    /// Client-streaming [`InstallRequest`] upload, answered by one
    /// [`InstallResult`].
    Install,
}

impl Hello {
    /// Short name of the call, used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Push => "push",
            Self::Pull(_) => "pull",
            Self::Exec => "exec",
            Self::Install => "install",
        }
    }
}

/// Answer to a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelloAck {
    /// The call is open.
    Ready,
    /// The call was refused.
    Error(ErrorInfo),
}

/// Envelope for every streamed message after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame<T> {
    /// A protocol message.
    Data(T),
    /// The peer failed the call; no further frames follow.
    Abort(ErrorInfo),
}

/// Echo fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Raw bytes.
    pub payload: Vec<u8>,
}

/// Push/pull fragment: a slice of a tar stream bound for `path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Destination directory (push) or source path (pull) on the device.
    pub path: String,
    /// Tar stream bytes.
    pub payload: Vec<u8>,
}

impl Transfer {
    /// Builds a payload-less fragment naming `path`.
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            payload: Vec::new(),
        }
    }
}

/// Final answer to a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAck {
    /// Whether the archive was fully extracted.
    pub success: bool,
    /// Failure description when `success` is false.
    pub err: String,
}

/// Command to run on the device. Semantics follow `execve`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cmd {
    /// Executable path or name.
    pub path: String,
    /// Arguments, excluding argv\[0\].
    pub args: Vec<String>,
    /// Working directory on the device.
    pub dir: Option<String>,
    /// Extra environment variables in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Whether the client will stream stdin.
    pub pipe_in: bool,
}

impl Cmd {
    /// Creates a command with no arguments.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the arguments (excluding argv\[0\]).
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Sets the extra environment (`KEY=VALUE`).
    #[must_use]
    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }
}

/// Exec fragment in either direction.
///
/// The client sends one fragment carrying `cmd`, then zero or more `stdin`
/// fragments. The device sends `stdout`/`stderr` fragments and finally one
/// carrying `exit_code`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdProgress {
    /// Initiation payload (first client fragment only).
    pub cmd: Option<Cmd>,
    /// Bytes for the process' stdin.
    pub stdin: Option<Vec<u8>>,
    /// Bytes read from the process' stdout.
    pub stdout: Option<Vec<u8>>,
    /// Bytes read from the process' stderr.
    pub stderr: Option<Vec<u8>>,
    /// Process exit code (`-1` if killed by a signal).
    pub exit_code: Option<i32>,
}

/// Install fragment. The first carries `args` and `size`, the rest `payload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Installer arguments.
    pub args: Vec<String>,
    /// Declared package size in bytes.
    pub size: u64,
    /// Package bytes.
    pub payload: Vec<u8>,
}

/// Final answer to an install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    /// Combined installer output.
    pub output: String,
    /// Installer exit code.
    pub exit_code: i32,
}

/// Failure category carried in [`ErrorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    /// A named path does not exist on the device.
    NotFound,
    /// The request was malformed.
    InvalidArgument,
    /// The device failed while serving the call.
    Internal,
    /// The device does not serve this call.
    Unimplemented,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::InvalidArgument => "invalid argument",
            Self::Internal => "internal",
            Self::Unimplemented => "unimplemented",
        })
    }
}

/// Structured error reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure category.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl ErrorInfo {
    /// Creates an error with the given code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorCode::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}
