//! Audio Session CLI - playback session daemon and bridge client
//!
//! `audiosession daemon` hosts the session coordinator behind a Unix socket.
//! Every other subcommand sends one request to that daemon:
//! - create/initialize/destroy audio sources
//! - drive playback and query positions
//! - register callbacks and poll their invocations
//! - record the seconds played in the background

use anyhow::Result;
use clap::{CommandFactory, Parser};

use audiosession::cli::{Cli, Commands, Display, IpcClient};
use audiosession::daemon::{self, DaemonConfig};

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Daemon(args) => {
            let mut config = DaemonConfig::load_or_default(args.config.as_deref())?;
            if let Some(socket) = cli.socket {
                config = config.with_socket_path(socket);
            }
            daemon::run_daemon(config).await?;
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
        command => {
            let client = match cli.socket {
                Some(socket) => IpcClient::with_socket_path(socket),
                None => IpcClient::new(),
            };
            if let Some(request) = command.into_request() {
                let response = client.send(&request).await?;
                Display::show_response(&response);
            }
        }
    }

    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================
