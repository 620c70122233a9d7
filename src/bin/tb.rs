//! tb - natural language to shell commands.
//!
//! Usage:
//!   tb query <text>              # Suggest a command (daemon if running)
//!   tb <text>                    # Same as `tb query <text>`
//!   tb server up                 # Start the daemon in the background
//!   tb server up --no-daemonize  # Run the daemon in this terminal
//!   tb server down               # Stop the daemon
//!   tb server status             # Not running / starting / ready / crashed

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tbuddy::daemon::{ClientDispatcher, DaemonStatus, DaemonSupervisor, StartOutcome, StopOutcome};
use tbuddy::{build_resolver, resolve_once, Config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tb")]
#[command(about = "Terminal Buddy - natural language to shell commands", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Config file (default: $TB_CONFIG or ~/.config/terminal-buddy/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Suggest a shell command for a natural-language request
    Query {
        /// The request, e.g. "list all files including hidden ones"
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Manage the background server
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Any other words are treated as a query
    #[command(external_subcommand)]
    Shortcut(Vec<String>),
}

#[derive(Subcommand)]
enum ServerAction {
    /// Start the server
    Up {
        /// Detach into the background (default)
        #[arg(long, overrides_with = "no_daemonize")]
        daemonize: bool,

        /// Run in the foreground
        #[arg(long, overrides_with = "daemonize")]
        no_daemonize: bool,
    },

    /// Stop the server
    Down,

    /// Show server state
    Status,
}

fn main() {
    let cli = Cli::parse();

    let serving = matches!(
        cli.command,
        Commands::Server {
            action: ServerAction::Up { .. }
        }
    );
    init_tracing(cli.verbose, serving);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, serving: bool) {
    let default = if verbose {
        "debug"
    } else if serving {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading config")?;

    match cli.command {
        Commands::Query { text } | Commands::Shortcut(text) => query(&config, &text.join(" ")),
        Commands::Server { action } => {
            let supervisor = DaemonSupervisor::new(config.server.clone()).with_config_path(cli.config);
            match action {
                ServerAction::Up { no_daemonize, .. } => server_up(&config, &supervisor, !no_daemonize),
                ServerAction::Down => {
                    server_down(&supervisor);
                    Ok(())
                }
                ServerAction::Status => {
                    server_status(&supervisor);
                    Ok(())
                }
            }
        }
    }
}

fn query(config: &Config, text: &str) -> Result<()> {
    let dispatcher = ClientDispatcher::from_config(&config.server)?;
    let answer = dispatcher.dispatch(text, |q| {
        eprintln!("No daemon found. Running in one-off mode…");
        resolve_once(config, q)
    })?;
    println!("{}", answer.command);
    Ok(())
}

fn server_up(config: &Config, supervisor: &DaemonSupervisor, daemonize: bool) -> Result<()> {
    let outcome = supervisor
        .start(daemonize, || build_resolver(config))
        .context("starting server")?;

    match outcome {
        StartOutcome::AlreadyRunning { pid } => {
            println!("Server already running (pid {}). Run `tb server down` first.", pid);
        }
        StartOutcome::Spawned { pid } => {
            println!("Server starting in the background (pid {}).", pid);
            println!("Check readiness with `tb server status`. Logs: {}", config.server.log_file.display());
        }
        StartOutcome::Stopped => {
            println!("Server stopped.");
        }
    }
    Ok(())
}

fn server_down(supervisor: &DaemonSupervisor) {
    match supervisor.stop() {
        StopOutcome::NotRunning => println!("No server running."),
        StopOutcome::Stale { pid } => {
            println!("No server running (removed stale pid file for pid {}).", pid)
        }
        StopOutcome::Terminated { pid } => println!("Server stopped (pid {}).", pid),
        StopOutcome::Killed { pid } => {
            println!("Server killed (pid {}) after ignoring SIGTERM.", pid)
        }
        StopOutcome::Spared { pid } => println!(
            "Pid {} ignored SIGTERM and is not listening on the server port; left running, pid file removed.",
            pid
        ),
    }
}

fn server_status(supervisor: &DaemonSupervisor) {
    let server = supervisor.config();
    match supervisor.status() {
        DaemonStatus::NotRunning => println!("Server not running."),
        DaemonStatus::Crashed { pid } => println!(
            "Server not found: pid {} is gone (crashed?). Run `tb server down` to clean up.",
            pid
        ),
        DaemonStatus::Starting { pid } => println!(
            "Server starting (pid {}), not yet listening on {}:{}.",
            pid, server.host, server.port
        ),
        DaemonStatus::Ready { pid } => println!(
            "Server ready (pid {}) on {}:{}.",
            pid, server.host, server.port
        ),
    }
}
