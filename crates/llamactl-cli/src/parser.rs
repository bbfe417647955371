//! Root CLI parser with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Supervise a local llama-server and drive it over the control plane.
#[derive(Parser)]
#[command(name = "llamactl")]
#[command(about = "Supervise a local llama-server process")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "LLAMACTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
