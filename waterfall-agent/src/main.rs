//! waterfall agent: serves echo, push, pull, exec and install calls on a
//! Unix socket or TCP address.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use waterfall_agent::{Agent, AgentConfig};

/// Device-side agent for the waterfall client.
#[derive(Parser, Debug)]
#[command(name = "waterfall-agent", version, about)]
#[command(group(ArgGroup::new("listen").required(true).args(["unix", "tcp"])))]
struct Cli {
    /// Listen on a Unix socket at this path.
    #[arg(long, value_name = "PATH")]
    unix: Option<PathBuf>,

    /// Listen on this TCP address (e.g. 0.0.0.0:8088).
    #[arg(long, value_name = "ADDR")]
    tcp: Option<String>,

    /// Installer command line; args and the package path are appended.
    #[arg(long, num_args = 1.., value_name = "CMD", default_values = ["pm", "install"])]
    installer: Vec<String>,

    /// Directory for spooled install packages.
    #[arg(long, value_name = "DIR")]
    spool_dir: Option<PathBuf>,

    /// Log filter directives, e.g. `info` or `waterfall=debug` (RUST_LOG
    /// wins when set).
    #[arg(long, value_name = "DIRECTIVES", default_value = "info")]
    log_filter: String,
}

/// Installs the stderr log subscriber.
fn init_logging(directives: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .with_context(|| format!("invalid log filter {directives:?}"))?;
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_filter)?;

    let mut config = AgentConfig::default().installer(cli.installer);
    if let Some(dir) = cli.spool_dir {
        config = config.spool_dir(dir);
    }
    let agent = Agent::new(config);

    tokio::select! {
        served = serve(&agent, cli.tcp, cli.unix) => served,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("waiting for ctrl-c")?;
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

/// Serves on `--tcp` if given, otherwise on `--unix`.
async fn serve(agent: &Agent, tcp: Option<String>, unix: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(addr) = tcp {
        return agent
            .serve_tcp(&addr)
            .await
            .with_context(|| format!("serving on {addr}"));
    }
    serve_unix(agent, unix).await
}

/// Serves on the Unix socket given by `--unix`.
#[cfg(unix)]
async fn serve_unix(agent: &Agent, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.context("no listen address")?;
    agent
        .serve_unix(&path)
        .await
        .with_context(|| format!("serving on {}", path.display()))
}

/// Unix sockets are unavailable here.
#[cfg(not(unix))]
async fn serve_unix(_agent: &Agent, _path: Option<PathBuf>) -> anyhow::Result<()> {
    anyhow::bail!("unix sockets are not supported on this platform")
}
