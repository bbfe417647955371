//! Log sink ports.
//!
//! `ServerLogSinkPort` receives raw lines captured from the managed process.
//! `LogTarget` is the single optional remote destination of normalized records.

use crate::domain::LogRecord;

/// Port for appending server log lines to a sink.
///
/// Implementations should be thread-safe and non-blocking.
pub trait ServerLogSinkPort: Send + Sync {
    /// Append a log line from the managed process.
    ///
    /// * `stream_type` - Either "stdout" or "stderr"
    /// * `line` - The log line content (without trailing newline)
    fn append(&self, stream_type: &str, line: String);
}

/// Remote destination for normalized log records.
///
/// Emission is best effort. Implementations must not block or panic.
pub trait LogTarget: Send + Sync {
    fn emit(&self, record: &LogRecord);
}
