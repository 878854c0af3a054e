//! Package install: spool the upload, then hand it to the installer.

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use waterfall::{Call, Result};
use waterfall_proto::{ErrorCode, ErrorInfo, InstallRequest, InstallResult};

use crate::AgentConfig;

/// Spools the package to a temp file, checks its declared size and runs the
/// configured installer on it. Installer failures are reported in the
/// [`InstallResult`], not as call errors.
pub(crate) async fn handle(
    call: Call<InstallResult, InstallRequest>,
    config: &AgentConfig,
) -> Result<()> {
    let (mut tx, mut rx) = call.split();
    let Some(head) = rx.recv().await? else {
        let err = ErrorInfo::new(ErrorCode::InvalidArgument, "install carried no request");
        return tx.abort(err).await;
    };

    let spool = tempfile::Builder::new()
        .prefix("waterfall-install-")
        .tempfile_in(&config.spool_dir)?;
    let mut file = tokio::fs::File::from_std(spool.as_file().try_clone()?);
    file.write_all(&head.payload).await?;
    let mut received = head.payload.len() as u64;
    while let Some(req) = rx.recv().await? {
        file.write_all(&req.payload).await?;
        received += req.payload.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if received != head.size {
        warn!(declared = head.size, received, "install size mismatch");
        let err = ErrorInfo::new(
            ErrorCode::InvalidArgument,
            format!("declared {} bytes, received {received}", head.size),
        );
        return tx.abort(err).await;
    }

    let Some((program, fixed)) = config.installer.split_first() else {
        return tx.abort(ErrorInfo::internal("no installer configured")).await;
    };
    debug!(program, bytes = received, "running installer");
    let output = Command::new(program)
        .args(fixed)
        .args(&head.args)
        .arg(spool.path())
        .output()
        .await;

    let result = match output {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&out.stderr));
            InstallResult {
                output: text,
                exit_code: out.status.code().unwrap_or(-1),
            }
        }
        Err(e) => {
            warn!(program, error = %e, "installer did not start");
            return tx
                .abort(ErrorInfo::internal(format!("{program}: {e}")))
                .await;
        }
    };
    info!(exit_code = result.exit_code, "install finished");

    tx.send(result).await?;
    tx.close_send().await
}
