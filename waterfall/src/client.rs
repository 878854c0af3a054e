//! Host-side client for the five device calls.
//!
//! Every operation opens its own call through the [`Connector`], wires its
//! concurrent units together with [`pipe`]s, runs them under one
//! [`TaskGroup`] and returns the group's result.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use waterfall_proto::{
    Cmd, CmdProgress, ErrorInfo, Hello, InstallRequest, InstallResult, Message, Transfer,
    TransferAck,
};

use crate::archive;
use crate::call::{Call, CallReceiver, Connector, close_and_recv};
use crate::chunked::{ChunkWriter, EchoCarrier, InstallCarrier, StdinCarrier, TransferCarrier};
use crate::config::ClientConfig;
use crate::group::TaskGroup;
use crate::pipe::{PipeWriter, pipe};
use crate::{Error, Result};

/// Standard streams for [`Client::exec`].
///
/// Unset streams are not forwarded: without stdin the process sees an
/// immediate end-of-file, and unset outputs are discarded.
#[derive(Default)]
pub struct Stdio<'a> {
    /// Source streamed to the process' stdin.
    stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Sink for the process' stdout.
    stdout: Option<&'a mut (dyn AsyncWrite + Send + Unpin)>,
    /// Sink for the process' stderr.
    stderr: Option<&'a mut (dyn AsyncWrite + Send + Unpin)>,
}

impl<'a> Stdio<'a> {
    /// No stdin, outputs discarded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams `r` to the process' stdin.
    #[must_use]
    pub fn stdin(mut self, r: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(r));
        self
    }

    /// Writes the process' stdout to `w`.
    #[must_use]
    pub fn stdout(mut self, w: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        self.stdout = Some(w);
        self
    }

    /// Writes the process' stderr to `w`.
    #[must_use]
    pub fn stderr(mut self, w: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        self.stderr = Some(w);
        self
    }
}

impl fmt::Debug for Stdio<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stdio")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// A client driving one device.
///
/// Operations are independent: each owns its call, pipes and task group, so
/// a `Client` can be shared by concurrent operations.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> waterfall::Result<()> {
/// use waterfall::{Client, Stdio, TcpConnector};
///
/// let client = Client::new(TcpConnector::new("localhost:8088"));
/// client.push("/tmp/fixtures", "/data/local/tmp").await?;
///
/// let mut out = Vec::new();
/// let code = client
///     .exec("ls", ["-l", "/data/local/tmp"], Stdio::new().stdout(&mut out))
///     .await?;
/// assert_eq!(code, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client<C> {
    /// Opens one stream per call.
    connector: C,
    /// Chunk and buffer sizes.
    config: ClientConfig,
}

impl<C: Connector> Client<C> {
    /// Creates a client with the default [`ClientConfig`].
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    /// Creates a client with explicit tuning.
    pub const fn with_config(connector: C, config: ClientConfig) -> Self {
        Self { connector, config }
    }

    /// Returns the active configuration.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Streams `payload` to the device and returns what it sent back.
    ///
    /// Both directions run concurrently; useful as a connectivity and
    /// throughput check.
    #[instrument(level = "debug", skip_all)]
    pub async fn echo(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let payload = payload.to_vec();
        let (tx, mut rx) = Call::<Message, Message>::open(&self.connector, Hello::Echo)
            .await?
            .split();

        let (done, received) = oneshot::channel();
        let mut group = TaskGroup::new();
        group.spawn(async move {
            let mut buf = Vec::new();
            while let Some(msg) = rx.recv().await? {
                buf.extend_from_slice(&msg.payload);
            }
            let _ = done.send(buf);
            Ok(())
        });

        let chunk = self.config.echo_chunk();
        group.spawn(async move {
            let mut writer = ChunkWriter::new(tx, EchoCarrier, chunk);
            writer.write(&payload).await?;
            writer.close_send().await
        });

        group.wait().await?;
        received
            .await
            .map_err(|_| Error::Protocol("echo receiver produced no result".into()))
    }

    /// Archives the local file or directory `src` into the device directory
    /// `dst`, as `dst/<basename of src>`.
    ///
    /// Validation of `dst` is left to the device; its refusal is returned as
    /// [`Error::PushRejected`] carrying the device's message verbatim.
    #[instrument(level = "debug", skip(self, src), fields(src = %src.as_ref().display()))]
    pub async fn push(&self, src: impl AsRef<Path>, dst: &str) -> Result<()> {
        let src = src.as_ref().to_path_buf();
        tokio::fs::symlink_metadata(&src).await?;
        self.push_archive(dst.to_owned(), move |w| archive::tar_path(w, &src))
            .await
    }

    /// Writes `bytes` to the device file `dst`.
    #[instrument(level = "debug", skip(self, bytes))]
    pub async fn push_bytes(&self, bytes: &[u8], dst: &str) -> Result<()> {
        let (dir, name) = split_remote_path(dst)?;
        let bytes = bytes.to_vec();
        self.push_archive(dir, move |w| archive::tar_bytes(w, &name, &bytes))
            .await
    }

    /// Downloads the device path `src` (file or directory) and unpacks it
    /// into the local directory `dst`, as `dst/<basename of src>`.
    ///
    /// The parent of `dst` must exist; this is checked before the call is
    /// opened. A failed pull can leave a partial tree behind.
    #[instrument(level = "debug", skip(self, dst), fields(dst = %dst.as_ref().display()))]
    pub async fn pull(&self, src: &str, dst: impl AsRef<Path>) -> Result<()> {
        let dst = dst.as_ref().to_path_buf();
        tokio::fs::metadata(parent_dir(&dst)).await?;

        let rx = self.open_pull(src).await?;
        let (tar_w, tar_r) = pipe(self.config.pipe());

        let mut group = TaskGroup::new();
        group.spawn(receive_transfer(rx, tar_w));
        let source = tar_r.into_blocking();
        group.spawn_blocking(move || archive::untar(source, &dst).map_err(Error::from));
        group.wait().await
    }

    /// Downloads the single device file `src` into `dst`. Returns the number
    /// of bytes written.
    #[instrument(level = "debug", skip(self, dst))]
    pub async fn pull_bytes<W>(&self, dst: &mut W, src: &str) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let rx = self.open_pull(src).await?;
        let (tar_w, tar_r) = pipe(self.config.pipe());
        let (raw_w, raw_r) = pipe(self.config.pipe());

        let mut group = TaskGroup::new();
        group.spawn(receive_transfer(rx, tar_w));
        let source = tar_r.into_blocking();
        let mut sink = raw_w.into_blocking();
        group.spawn_blocking(move || {
            archive::untar_bytes(source, &mut sink)?;
            sink.shutdown()?;
            Ok(())
        });

        // Owns the read end so a failing `dst` releases the decoder.
        let forward = async move {
            let mut raw_r = raw_r;
            tokio::io::copy(&mut raw_r, dst).await
        };
        let (copied, joined) = tokio::join!(forward, group.wait());
        // A failing `dst` breaks the decoder's pipe; report the cause.
        let n = copied?;
        joined?;
        Ok(n)
    }

    /// Runs `cmd` with `args` on the device and returns its exit code.
    pub async fn exec<I, S>(&self, cmd: &str, args: I, stdio: Stdio<'_>) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_cmd(Cmd::new(cmd).args(args), stdio).await
    }

    /// Runs `cmd` on the device and returns its exit code.
    ///
    /// Stdin upload and output download run concurrently. When the device
    /// process exits before consuming all of stdin, the upload is cancelled
    /// (its pending read is dropped) and the exit code is still returned.
    /// `cmd.pipe_in` is derived from `stdio`.
    #[instrument(level = "debug", skip_all, fields(cmd = %cmd.path))]
    pub async fn exec_cmd(&self, mut cmd: Cmd, stdio: Stdio<'_>) -> Result<i32> {
        let Stdio {
            stdin,
            stdout,
            stderr,
        } = stdio;
        cmd.pipe_in = stdin.is_some();

        let (mut tx, mut rx) =
            Call::<CmdProgress, CmdProgress>::open(&self.connector, Hello::Exec)
                .await?
                .split();
        tx.send(CmdProgress {
            cmd: Some(cmd),
            ..CmdProgress::default()
        })
        .await?;

        let early_exit = CancellationToken::new();
        let mut group = TaskGroup::new();
        match stdin {
            Some(mut input) => {
                let exited = early_exit.clone();
                let chunk = self.config.transfer_chunk();
                group.spawn(async move {
                    let mut writer = ChunkWriter::new(tx, StdinCarrier, chunk);
                    let copied = tokio::select! {
                        copied = writer.copy_from(&mut input) => Some(copied),
                        () = exited.cancelled() => None,
                    };
                    match copied {
                        Some(Ok(n)) => {
                            debug!(bytes = n, "stdin exhausted");
                            match writer.close_send().await {
                                Err(Error::Disconnected) => Ok(()),
                                other => other,
                            }
                        }
                        None | Some(Err(Error::Disconnected)) => {
                            debug!("process exited before stdin was exhausted");
                            Ok(())
                        }
                        Some(Err(e)) => {
                            // The device must see stdin end or its process
                            // never exits.
                            let info = ErrorInfo::internal(format!("host stdin failed: {e}"));
                            let _ = writer.into_inner().abort(info).await;
                            Err(e)
                        }
                    }
                });
            }
            None => tx.close_send().await?,
        }

        let received = drain_progress(&mut rx, stdout, stderr).await;
        early_exit.cancel();
        let joined = group.wait().await;

        let exit_code = received?;
        joined?;
        exit_code.ok_or_else(|| Error::Protocol("exec stream ended without an exit code".into()))
    }

    /// Installs the package in `file` on the device with installer `args`.
    ///
    /// Returns the installer output. A non-zero installer exit code becomes
    /// [`Error::InstallFailed`] carrying both the code and the output.
    #[instrument(level = "debug", skip_all)]
    pub async fn install<I, S>(&self, mut file: tokio::fs::File, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let size = file.metadata().await?.len();
        let (mut tx, mut rx) =
            Call::<InstallRequest, InstallResult>::open(&self.connector, Hello::Install)
                .await?
                .split();
        tx.send(InstallRequest {
            args: args.into_iter().map(Into::into).collect(),
            size,
            payload: Vec::new(),
        })
        .await?;

        let mut writer = ChunkWriter::new(tx, InstallCarrier, self.config.transfer_chunk());
        let copied = writer.copy_from(&mut file).await?;
        debug!(size, copied, "package uploaded");

        let mut tx = writer.into_inner();
        let result = close_and_recv(&mut tx, &mut rx).await?;
        if result.exit_code != 0 {
            return Err(Error::InstallFailed {
                code: result.exit_code,
                output: result.output,
            });
        }
        Ok(result.output)
    }

    /// Runs a push: `encode` fills the pipe on a blocking thread while a
    /// sender unit forwards it to the device.
    async fn push_archive<F>(&self, dst: String, encode: F) -> Result<()>
    where
        F: FnOnce(&mut SyncIoBridge<PipeWriter>) -> io::Result<()> + Send + 'static,
    {
        let (tx, mut rx) = Call::<Transfer, TransferAck>::open(&self.connector, Hello::Push)
            .await?
            .split();
        let (tar_w, mut tar_r) = pipe(self.config.pipe());
        let (status_tx, status) = oneshot::channel();

        let mut group = TaskGroup::new();
        let mut sink = tar_w.into_blocking();
        group.spawn_blocking(move || {
            let encoded = encode(&mut sink);
            let _ = status_tx.send(encoded.is_ok());
            let closed = sink.shutdown();
            encoded?;
            closed.map_err(Error::from)
        });

        let chunk = self.config.transfer_chunk();
        group.spawn(async move {
            let mut writer = ChunkWriter::new(tx, TransferCarrier { path: dst }, chunk);
            writer.copy_from(&mut tar_r).await?;
            let mut tx = writer.into_inner();

            if !matches!(status.await, Ok(true)) {
                // The encoder unit reports the cause; keep the device from
                // committing a truncated archive.
                let _ = tx.abort(ErrorInfo::internal("host failed to encode archive")).await;
                return Ok(());
            }
            let ack = close_and_recv(&mut tx, &mut rx).await?;
            if ack.success {
                Ok(())
            } else {
                Err(Error::PushRejected(ack.err))
            }
        });

        group.wait().await
    }

    /// Opens a pull call for `src` and half-closes it.
    async fn open_pull(&self, src: &str) -> Result<CallReceiver<Transfer>> {
        let (mut tx, rx) =
            Call::<(), Transfer>::open(&self.connector, Hello::Pull(Transfer::path(src)))
                .await?
                .split();
        tx.close_send().await?;
        Ok(rx)
    }
}

/// Pipes incoming transfer payloads into `w` until the device closes the
/// call. Dropping `w` on error gives the decoder end-of-stream.
async fn receive_transfer(mut rx: CallReceiver<Transfer>, mut w: PipeWriter) -> Result<()> {
    while let Some(fragment) = rx.recv().await? {
        w.write_all(&fragment.payload).await?;
    }
    w.close().await?;
    Ok(())
}

/// Demultiplexes exec output into the sinks and returns the last exit code
/// seen.
async fn drain_progress(
    rx: &mut CallReceiver<CmdProgress>,
    mut stdout: Option<&mut (dyn AsyncWrite + Send + Unpin + '_)>,
    mut stderr: Option<&mut (dyn AsyncWrite + Send + Unpin + '_)>,
) -> Result<Option<i32>> {
    let mut exit_code = None;
    while let Some(progress) = rx.recv().await? {
        if let (Some(bytes), Some(out)) = (progress.stdout, stdout.as_deref_mut()) {
            out.write_all(&bytes).await?;
        }
        if let (Some(bytes), Some(err)) = (progress.stderr, stderr.as_deref_mut()) {
            err.write_all(&bytes).await?;
        }
        if progress.exit_code.is_some() {
            exit_code = progress.exit_code;
        }
    }
    if let Some(out) = stdout {
        out.flush().await?;
    }
    if let Some(err) = stderr {
        err.flush().await?;
    }
    Ok(exit_code)
}

/// Returns the directory that must exist before unpacking into `dst`.
fn parent_dir(dst: &Path) -> PathBuf {
    match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Splits a device file path into `(directory, file name)`.
fn split_remote_path(path: &str) -> Result<(String, String)> {
    let (dir, name) = match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", path),
    };
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {path:?}"),
        )));
    }
    Ok((dir.to_owned(), name.to_owned()))
}
