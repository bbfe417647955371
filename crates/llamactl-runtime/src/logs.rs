//! Log fan-out broadcaster.
//!
//! Keeps the most recent records in a bounded ring buffer and forwards each
//! new record to at most one attached remote target.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use llamactl_core::{LogInput, LogRecord, LogTarget, ServerLogSinkPort};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Maximum number of records kept in the ring buffer.
pub const LOG_CAPACITY: usize = 500;

/// Source tag used when none is configured.
pub const DEFAULT_LOG_SOURCE: &str = "llama-service";

const DEFAULT_LEVEL: &str = "info";

/// Bounded in-memory log store with a single optional broadcast target.
pub struct LogBroadcaster {
    source: String,
    buffer: Mutex<VecDeque<LogRecord>>,
    target: RwLock<Option<Arc<dyn LogTarget>>>,
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_SOURCE)
    }
}

impl LogBroadcaster {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            buffer: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
            target: RwLock::new(None),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Normalize `input`, store it and emit it to the attached target.
    pub fn log(&self, input: LogInput) -> LogRecord {
        let record = LogRecord {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            level: input.level.unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
            message: input.message.into_text(),
            timestamp: input.timestamp.unwrap_or_else(Utc::now),
            source: self.source.clone(),
            context: input.context,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() >= LOG_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back(record.clone());
        }

        let target = self
            .target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(target) = target {
            target.emit(&record);
        }

        record
    }

    /// All buffered records, newest first.
    pub fn get_logs(&self) -> Vec<LogRecord> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().rev().cloned().collect()
    }

    /// Buffered records whose level equals `level` exactly, newest first.
    pub fn get_logs_by_level(&self, level: &str) -> Vec<LogRecord> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer
            .iter()
            .rev()
            .filter(|record| record.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the buffer. The attached target stays attached.
    pub fn clear_queue(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Attach the broadcast target, replacing any previous one.
    pub fn attach_target(&self, target: Arc<dyn LogTarget>) {
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = Some(target);
    }

    pub fn detach_target(&self) {
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_target(&self) -> bool {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl ServerLogSinkPort for LogBroadcaster {
    fn append(&self, stream_type: &str, line: String) {
        let mut context = Map::new();
        context.insert("stream".to_string(), Value::String(stream_type.to_string()));
        self.log(LogInput {
            context: Some(context),
            ..LogInput::new(line)
        });
    }
}
