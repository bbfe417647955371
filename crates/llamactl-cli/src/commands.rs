//! Subcommands of the `llamactl` binary.

use clap::Subcommand;
use llamactl_control::Subscription;

#[derive(Subcommand)]
pub enum Commands {
    /// Host the supervisor and its control endpoint
    Serve {
        /// Control endpoint address (defaults to control.listen)
        #[arg(long)]
        listen: Option<String>,
        /// Do not start llama-server on launch
        #[arg(long)]
        no_autostart: bool,
    },

    /// Issue one control operation and print its reply
    Call {
        /// Event name, e.g. "service:status" or "models:load"
        event: String,
        /// JSON payload for the operation
        #[arg(short, long)]
        payload: Option<String>,
        /// Control endpoint to connect to
        #[arg(long)]
        connect: Option<String>,
    },

    /// Print pushed events as JSON lines until interrupted
    Watch {
        /// Streams to subscribe to (all when omitted)
        #[arg(short, long)]
        stream: Vec<Subscription>,
        /// Control endpoint to connect to
        #[arg(long)]
        connect: Option<String>,
    },

    /// Print the llama-server command line for the current configuration
    Args,
}
