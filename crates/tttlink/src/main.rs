//! tttlink - console tic-tac-toe, locally or against one peer over TCP.

#![warn(missing_docs)]

mod cli;
mod console;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use console::{ConsolePresenter, HELP, Input, parse_command};
use std::io::BufRead;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use tttlink_net::{Command, NetConfig, Session};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_file)?;

    let config = NetConfig::load_or_default(&cli.config)?.with_overrides(cli.port, None);
    info!(port = config.port(), "Starting tttlink");

    let (commands, command_rx) = mpsc::unbounded_channel();
    match cli.command {
        Some(cli::Command::Host { bind }) => commands.send(Command::Host { bind })?,
        Some(cli::Command::Join { host }) => commands.send(Command::Join { host })?,
        Some(cli::Command::Local) | None => {}
    }

    println!("{}", HELP);
    spawn_stdin_reader(commands);

    let presenter = ConsolePresenter::new(std::io::stdout());
    Session::new(config, presenter).run(command_rx).await;

    info!("tttlink exited");
    Ok(())
}

/// Sends tracing output to a file so it never mixes with the game.
fn init_tracing(log_file: &Path) -> Result<()> {
    let file = std::fs::File::create(log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tttlink=debug")),
        )
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

/// Reads stdin on a plain thread; a blocking read must not hold up runtime
/// shutdown.
#[instrument(skip(commands))]
fn spawn_stdin_reader(commands: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            };
            match parse_command(&line) {
                Ok(Input::Command(command)) => {
                    debug!(?command, "Console command");
                    let quitting = command == Command::Quit;
                    if commands.send(command).is_err() || quitting {
                        return;
                    }
                }
                Ok(Input::Help) => println!("{}", HELP),
                Ok(Input::Empty) => {}
                Err(e) => println!("{}", e),
            }
        }
        // End of input.
        let _ = commands.send(Command::Quit);
    });
}
