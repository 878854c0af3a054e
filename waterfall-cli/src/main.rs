//! CLI for driving a device through the waterfall agent.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod device;
mod logging;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use waterfall::{Client, Connector, TcpConnector};

use crate::logging::LogLevel;

#[derive(Parser)]
#[command(name = "wf", version, about = "Push, pull and run commands on a device")]
struct Cli {
    /// Agent Unix socket.
    #[arg(long, global = true, env = "WATERFALL_UNIX", value_name = "PATH")]
    unix: Option<std::path::PathBuf>,

    /// Agent TCP address (host:port). Takes precedence over --unix.
    #[arg(long, global = true, env = "WATERFALL_TCP", value_name = "ADDR")]
    tcp: Option<String>,

    /// Log verbosity (overridden by RUST_LOG).
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send bytes to the device and print what comes back.
    Echo(device::EchoArgs),

    /// Copy a local file or directory into a device directory.
    ///
    /// Use `-` as SRC to write stdin to the device file DST.
    Push(device::PushArgs),

    /// Copy a device file or directory into a local directory.
    ///
    /// Use `-` as DST to write the device file SRC to stdout.
    Pull(device::PullArgs),

    /// Run a command on the device; exits with its exit code.
    Exec(device::ExecArgs),

    /// Install a package on the device.
    Install(device::InstallArgs),

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level);
    let code = match cli.dispatch().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("wf: {e:#}");
            1
        }
    };
    // A stdin read parked on the blocking pool would hold up runtime
    // shutdown until the terminal produced input.
    std::process::exit(code);
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "wf", &mut std::io::stdout());
            return Ok(());
        }

        if let Some(addr) = self.tcp {
            return run(Client::new(TcpConnector::new(addr)), self.command).await;
        }
        #[cfg(unix)]
        if let Some(path) = self.unix {
            return run(Client::new(waterfall::UnixConnector::new(path)), self.command).await;
        }
        anyhow::bail!("no agent address: pass --unix/--tcp or set WATERFALL_UNIX/WATERFALL_TCP")
    }
}

async fn run<C: Connector>(client: Client<C>, command: Command) -> Result<()> {
    match command {
        Command::Echo(args) => device::echo(&client, args).await,
        Command::Push(args) => device::push(&client, args).await,
        Command::Pull(args) => device::pull(&client, args).await,
        Command::Exec(args) => device::exec(&client, args).await,
        Command::Install(args) => device::install(&client, args).await,
        Command::Completion { .. } => Ok(()),
    }
}
