//! Command execution: stdin from the host, stdout/stderr back, then the exit
//! code.

use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};
use waterfall::{Call, CallReceiver, Result};
use waterfall_proto::{CmdProgress, ErrorCode, ErrorInfo};

/// Bytes read from the child per output message.
const OUTPUT_CHUNK: usize = 32 * 1024;

/// Runs the command named by the first message until it exits.
///
/// Output is streamed while the process runs. The exit code (`-1` when the
/// process was killed by a signal) is the last message before the half-close.
pub(crate) async fn handle(call: Call<CmdProgress, CmdProgress>) -> Result<()> {
    let (mut tx, mut rx) = call.split();
    let Some(CmdProgress { cmd: Some(req), .. }) = rx.recv().await? else {
        let err = ErrorInfo::new(ErrorCode::InvalidArgument, "exec must start with a command");
        return tx.abort(err).await;
    };

    let mut cmd = Command::new(&req.path);
    cmd.args(&req.args)
        .stdin(if req.pipe_in {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = req.dir {
        cmd.current_dir(dir);
    }
    for pair in &req.env {
        if let Some((k, v)) = pair.split_once('=') {
            cmd.env(k, v);
        }
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!(cmd = %req.path, error = %e, "spawn failed");
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::NotFound
            } else {
                ErrorCode::Internal
            };
            return tx.abort(ErrorInfo::new(code, format!("{}: {e}", req.path))).await;
        }
    };
    debug!(pid = child.id(), cmd = %req.path, "process started");

    let stdin_pump = tokio::spawn(forward_stdin(rx, child.stdin.take()));
    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(std::io::Error::other("child output pipes missing").into());
    };

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut out_buf = vec![0u8; OUTPUT_CHUNK];
    let mut err_buf = vec![0u8; OUTPUT_CHUNK];
    while !(stdout_done && stderr_done) {
        tokio::select! {
            n = stdout.read(&mut out_buf), if !stdout_done => match n {
                Ok(0) | Err(_) => stdout_done = true,
                Ok(len) => {
                    let progress = CmdProgress {
                        stdout: Some(out_buf[..len].to_vec()),
                        ..CmdProgress::default()
                    };
                    tx.send(progress).await?;
                }
            },
            n = stderr.read(&mut err_buf), if !stderr_done => match n {
                Ok(0) | Err(_) => stderr_done = true,
                Ok(len) => {
                    let progress = CmdProgress {
                        stderr: Some(err_buf[..len].to_vec()),
                        ..CmdProgress::default()
                    };
                    tx.send(progress).await?;
                }
            },
        }
    }

    let status = child.wait().await?;
    stdin_pump.abort();
    let code = status.code().unwrap_or(-1);
    debug!(code, "process exited");

    tx.send(CmdProgress {
        exit_code: Some(code),
        ..CmdProgress::default()
    })
    .await?;
    tx.close_send().await
}

/// Copies host stdin fragments into the child until the host half-closes.
///
/// When the child stops reading, later fragments are discarded so the host
/// is never stalled on a dead pipe.
async fn forward_stdin(mut rx: CallReceiver<CmdProgress>, mut stdin: Option<ChildStdin>) {
    loop {
        match rx.recv().await {
            Ok(Some(progress)) => {
                if let (Some(data), Some(pipe)) = (progress.stdin, stdin.as_mut())
                    && pipe.write_all(&data).await.is_err()
                {
                    stdin = None;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stdin stream ended");
                break;
            }
        }
    }
}
