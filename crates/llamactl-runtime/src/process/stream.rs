//! Async stream log readers (non-UTF8-safe).
//!
//! llama-server can emit non-UTF8 bytes on stdout/stderr. `BufReader::lines()`
//! would terminate the reader task on invalid UTF-8, so lines are read as
//! bytes and decoded lossily.

use std::sync::Arc;

use llamactl_core::ServerLogSinkPort;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

/// Forward every line of `stream` to `sink` until EOF or a read error.
pub fn spawn_stream_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    stream_type: &'static str,
    sink: Option<Arc<dyn ServerLogSinkPort>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    trim_line_ending(&mut buf);
                    let line = String::from_utf8_lossy(&buf).to_string();
                    debug!(%stream_type, "{}", line);
                    if let Some(sink) = &sink {
                        sink.append(stream_type, line);
                    }
                }
                Err(e) => {
                    debug!(%stream_type, error = %e, "log stream reader exiting due to read error");
                    break;
                }
            }
        }

        debug!(%stream_type, "log stream reader task exiting");
    })
}

fn trim_line_ending(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<(String, String)>>,
    }

    impl ServerLogSinkPort for CollectingSink {
        fn append(&self, stream_type: &str, line: String) {
            self.lines
                .lock()
                .unwrap()
                .push((stream_type.to_string(), line));
        }
    }

    #[tokio::test]
    async fn test_reads_lines_with_lossy_utf8() {
        let sink = Arc::new(CollectingSink::default());
        let input: &[u8] = b"loading model\r\nbad \xff byte\nlast line without newline";

        spawn_stream_reader(input, "stderr", Some(sink.clone() as Arc<dyn ServerLogSinkPort>))
            .await
            .unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ("stderr".to_string(), "loading model".to_string()));
        assert_eq!(lines[1].1, "bad \u{fffd} byte");
        assert_eq!(lines[2].1, "last line without newline");
    }

    #[tokio::test]
    async fn test_without_sink_drains_stream() {
        let input: &[u8] = b"a\nb\n";
        spawn_stream_reader(input, "stdout", None).await.unwrap();
    }
}
