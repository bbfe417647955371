//! Library half of the `llamactl` binary: argument parsing, bootstrap and
//! command handlers.

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod commands;
pub mod handlers;
pub mod parser;

pub use bootstrap::{build_server, connect_client, init_tracing, load_config};
pub use commands::Commands;
pub use parser::Cli;
