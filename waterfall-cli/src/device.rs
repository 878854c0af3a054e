//! Device commands: echo, push, pull, exec, install.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use waterfall::{Client, Cmd, Connector, Stdio};

/// Arguments for `wf echo`.
#[derive(clap::Args)]
pub struct EchoArgs {
    /// Text to send; stdin when omitted.
    pub text: Option<String>,
}

/// Arguments for `wf push`.
#[derive(clap::Args)]
pub struct PushArgs {
    /// Local file or directory, or `-` for stdin.
    pub src: String,

    /// Device directory (device file when SRC is `-`).
    pub dst: String,
}

/// Arguments for `wf pull`.
#[derive(clap::Args)]
pub struct PullArgs {
    /// Device file or directory.
    pub src: String,

    /// Local directory, or `-` for stdout (SRC must be a file).
    pub dst: String,
}

/// Arguments for `wf exec`.
///
/// Usage: `wf exec [OPTIONS] COMMAND [ARG...]`
#[derive(clap::Args)]
#[command(trailing_var_arg = true)]
pub struct ExecArgs {
    /// Set environment variables (KEY=VALUE).
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Read environment variables from a file.
    #[arg(long)]
    pub env_file: Vec<String>,

    /// Forward stdin to the command.
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Working directory on the device.
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// Command and arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for `wf install`.
#[derive(clap::Args)]
#[command(trailing_var_arg = true)]
pub struct InstallArgs {
    /// Package file.
    pub package: PathBuf,

    /// Extra installer arguments (e.g. -r -g).
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub async fn echo<C: Connector>(client: &Client<C>, args: EchoArgs) -> Result<()> {
    let payload = match args.text {
        Some(text) => text.into_bytes(),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("reading stdin")?;
            buf
        }
    };
    let echoed = client.echo(&payload).await?;
    let mut out = tokio::io::stdout();
    out.write_all(&echoed).await?;
    out.flush().await?;
    Ok(())
}

pub async fn push<C: Connector>(client: &Client<C>, args: PushArgs) -> Result<()> {
    if args.src == "-" {
        let mut bytes = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut bytes)
            .await
            .context("reading stdin")?;
        return client
            .push_bytes(&bytes, &args.dst)
            .await
            .with_context(|| format!("push to {}", args.dst));
    }
    client
        .push(&args.src, &args.dst)
        .await
        .with_context(|| format!("push {} to {}", args.src, args.dst))
}

pub async fn pull<C: Connector>(client: &Client<C>, args: PullArgs) -> Result<()> {
    if args.dst == "-" {
        let mut out = tokio::io::stdout();
        client
            .pull_bytes(&mut out, &args.src)
            .await
            .with_context(|| format!("pull {}", args.src))?;
        out.flush().await?;
        return Ok(());
    }
    client
        .pull(&args.src, &args.dst)
        .await
        .with_context(|| format!("pull {} to {}", args.src, args.dst))
}

pub async fn exec<C: Connector>(client: &Client<C>, args: ExecArgs) -> Result<()> {
    let (cmd, cmd_args) = args.command.split_first().context("command required")?;
    let mut req = Cmd::new(cmd).args(cmd_args.iter().cloned());

    // Merge env: --env-file first, then -e overrides.
    let mut env_vars = Vec::new();
    for path in &args.env_file {
        env_vars.extend(read_env_file(path)?);
    }
    env_vars.extend(args.env);
    if !env_vars.is_empty() {
        req = req.env(env_vars);
    }
    if let Some(ref wd) = args.workdir {
        req = req.dir(wd);
    }

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut stdio = Stdio::new().stdout(&mut stdout).stderr(&mut stderr);
    if args.interactive {
        stdio = stdio.stdin(tokio::io::stdin());
    }

    let code = client.exec_cmd(req, stdio).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

pub async fn install<C: Connector>(client: &Client<C>, args: InstallArgs) -> Result<()> {
    let file = tokio::fs::File::open(&args.package)
        .await
        .with_context(|| format!("cannot open {}", args.package.display()))?;
    let output = client.install(file, args.args).await?;
    print!("{output}");
    Ok(())
}

/// Reads `KEY=VALUE` lines, skipping blanks and `#` comments.
pub fn read_env_file(path: &str) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read env file: {path}"))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}
