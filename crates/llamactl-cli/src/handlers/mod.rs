//! Command handlers.

pub mod args;
pub mod call;
pub mod serve;
pub mod watch;
