//! Listeners and per-connection call dispatch.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use waterfall::{Call, Result};
use waterfall_proto::{ErrorCode, ErrorInfo, Hello, HelloAck, Message};

use crate::{exec, files, install};

/// Agent settings.
#[derive(Debug, Clone)]
#[must_use]
pub struct AgentConfig {
    /// Installer command line; the request args and the package path are
    /// appended.
    pub(crate) installer: Vec<String>,
    /// Directory for spooled install packages.
    pub(crate) spool_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            installer: vec!["pm".to_owned(), "install".to_owned()],
            spool_dir: std::env::temp_dir(),
        }
    }
}

impl AgentConfig {
    /// Sets the installer command line (program followed by fixed args).
    pub fn installer<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installer = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Sets where install packages are spooled before the installer runs.
    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = dir.into();
        self
    }
}

/// Serves waterfall calls.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Shared by every session.
    config: Arc<AgentConfig>,
}

impl Agent {
    /// Creates an agent.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Accepts connections on a Unix socket at `path` until an accept fails.
    ///
    /// A stale socket file at `path` is replaced.
    #[cfg(unix)]
    pub async fn serve_unix(&self, path: impl AsRef<std::path::Path>) -> io::Result<()> {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        let listener = tokio::net::UnixListener::bind(path)?;
        info!(path = %path.display(), "listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            self.spawn_session(stream);
        }
    }

    /// Accepts connections on `addr` until an accept fails.
    pub async fn serve_tcp(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!(%peer, "accepted");
            self.spawn_session(stream);
        }
    }

    /// Serves the single call carried by `stream`.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        session(&self.config, stream).await
    }

    /// Runs a session in the background, logging its failure.
    fn spawn_session<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            if let Err(e) = session(&config, stream).await {
                warn!(error = %e, "session failed");
            }
        });
    }
}

/// Reads the [`Hello`], answers it and runs the call's handler.
async fn session<S>(config: &AgentConfig, stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (r, mut w) = tokio::io::split(stream);
    let mut r = BufReader::new(r);

    let Some(hello) = waterfall_proto::recv::<Hello, _>(&mut r).await? else {
        return Ok(());
    };
    debug!(call = hello.name(), "session opened");

    if let Hello::Pull(req) = &hello
        && let Err(e) = tokio::fs::symlink_metadata(&req.path).await
    {
        let err = ErrorInfo::new(ErrorCode::NotFound, format!("{}: {e}", req.path));
        waterfall_proto::send(&mut w, &HelloAck::Error(err)).await?;
        return Ok(());
    }
    waterfall_proto::send(&mut w, &HelloAck::Ready).await?;

    match hello {
        Hello::Echo => echo(Call::from_parts(r, w)).await,
        Hello::Push => files::push(Call::from_parts(r, w)).await,
        Hello::Pull(req) => files::pull(Call::from_parts(r, w), req.path).await,
        Hello::Exec => exec::handle(Call::from_parts(r, w)).await,
        Hello::Install => install::handle(Call::from_parts(r, w), config).await,
    }
}

/// Sends every message back as it arrives.
async fn echo(call: Call<Message, Message>) -> Result<()> {
    let (mut tx, mut rx) = call.split();
    let mut reflected = 0usize;
    while let Some(msg) = rx.recv().await? {
        reflected += msg.payload.len();
        tx.send(msg).await?;
    }
    debug!(bytes = reflected, "echo done");
    tx.close_send().await
}
