//! KubeFreezer CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kubefreezer", version)]
#[command(about = "Admission gate that denies workload mutations during declared freeze windows")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand is given)
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show status of the running daemon
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Start { foreground: false });

    match command {
        Command::Start { foreground } => cmd_start(cli.debug, foreground),
        Command::Stop => cmd_stop(),
        Command::Status => cmd_status(),
    }
}

fn cmd_start(debug: bool, foreground: bool) -> anyhow::Result<()> {
    let settings = kubefreezer::settings::Settings::load()?;
    let paths = kubefreezer::daemon::DaemonPaths::new(&settings);

    if let Some(pid) = kubefreezer::daemon::is_running(&paths) {
        eprintln!("kubefreezer is already running (pid {pid})");
        std::process::exit(1);
    }

    if !foreground {
        // Fork before creating any Tokio runtime — the runtime's I/O
        // driver and thread pool don't survive fork.
        kubefreezer::daemon::daemonize(&paths)?;
    }

    let verbosity = if debug { "debug" } else { settings.log_verbosity.as_str() };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        if foreground {
            kubefreezer::daemon::init_foreground_tracing(verbosity);
        } else {
            kubefreezer::daemon::init_background_tracing(&paths, verbosity);
        }

        kubefreezer::run(settings, paths).await
    })
}

#[tokio::main]
async fn cmd_stop() -> anyhow::Result<()> {
    let settings = kubefreezer::settings::Settings::load()?;
    let paths = kubefreezer::daemon::DaemonPaths::new(&settings);

    let Some(pid) = kubefreezer::daemon::is_running(&paths) else {
        eprintln!("kubefreezer is not running");
        std::process::exit(1);
    };

    match kubefreezer::daemon::send_command(&paths, kubefreezer::daemon::IpcCommand::Shutdown).await {
        Ok(kubefreezer::daemon::IpcResponse::Ok) => {
            eprintln!("stopping kubefreezer (pid {pid})...");
        }
        Ok(kubefreezer::daemon::IpcResponse::Error { message }) => {
            eprintln!("shutdown failed: {message}");
            std::process::exit(1);
        }
        Ok(_) => {
            eprintln!("unexpected response from daemon");
            std::process::exit(1);
        }
        Err(error) => {
            eprintln!("failed to send shutdown command: {error}");
            std::process::exit(1);
        }
    }

    if kubefreezer::daemon::wait_for_exit(pid) {
        eprintln!("kubefreezer stopped");
        Ok(())
    } else {
        eprintln!("kubefreezer did not stop within 10 seconds (pid {pid})");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn cmd_status() -> anyhow::Result<()> {
    let settings = kubefreezer::settings::Settings::load()?;
    let paths = kubefreezer::daemon::DaemonPaths::new(&settings);

    let Some(pid) = kubefreezer::daemon::is_running(&paths) else {
        println!("kubefreezer is not running");
        return Ok(());
    };

    match kubefreezer::daemon::send_command(&paths, kubefreezer::daemon::IpcCommand::Status).await {
        Ok(kubefreezer::daemon::IpcResponse::Status { pid, uptime_seconds }) => {
            println!("kubefreezer is running (pid {pid}, uptime {uptime_seconds}s)");
        }
        Ok(_) => println!("kubefreezer is running (pid {pid}), status unavailable"),
        Err(error) => {
            eprintln!("failed to query daemon: {error}");
            std::process::exit(1);
        }
    }

    Ok(())
}
