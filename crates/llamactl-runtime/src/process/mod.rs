//! Managed process spawning, output capture and termination.

mod launcher;
mod shutdown;
mod stream;

pub use launcher::TokioProcessLauncher;
pub use shutdown::shutdown_child;
pub use stream::spawn_stream_reader;
