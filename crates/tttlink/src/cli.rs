//! Command-line interface for tttlink.

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// tttlink - tic-tac-toe on one screen or against a peer over TCP
#[derive(Parser, Debug)]
#[command(name = "tttlink")]
#[command(about = "Play tic-tac-toe locally or against one peer over TCP", long_about = None)]
#[command(version)]
pub struct Cli {
    /// How to start; defaults to a local game
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Network config file (missing file means defaults)
    #[arg(short, long, default_value = "tttlink.toml", global = true)]
    pub config: PathBuf,

    /// Port to listen on or dial, overriding the config file
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Log file; console output is reserved for the game
    #[arg(long, default_value = "tttlink.log", global = true)]
    pub log_file: PathBuf,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start with a local game on this screen
    Local,

    /// Host a network game and wait for a peer (you play X)
    Host {
        /// Local address to bind; auto-detected when omitted
        #[arg(long)]
        bind: Option<IpAddr>,
    },

    /// Join a hosted network game (you play O)
    Join {
        /// Host address, optionally with :port
        host: String,
    },
}
