//! Events a connection publishes to its owner, and the log sink they end in.

use std::sync::Mutex;

use systek_protocol::{AreaType, LogLevel, WireMessage};

/// A diagnostic raised by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub area: AreaType,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, area: AreaType, message: impl Into<String>) -> Self {
        Self {
            level,
            area,
            message: message.into(),
        }
    }
}

/// Published by a connection's receive task, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Log(LogEvent),
    Message(WireMessage),
}

/// Destination for log records.
///
/// Writes are fire-and-forget: implementations must not block for long
/// and have no way to report failure back to the caller.
pub trait LogSink: Send + Sync {
    /// `server_id` identifies the machine the record is about, if any.
    fn write(&self, level: LogLevel, area: AreaType, server_id: Option<u64>, message: &str);
}

/// Forwards records to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, level: LogLevel, area: AreaType, server_id: Option<u64>, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(?area, ?server_id, "{message}"),
            LogLevel::Warning => tracing::warn!(?area, ?server_id, "{message}"),
            LogLevel::Info => tracing::info!(?area, ?server_id, "{message}"),
            LogLevel::Debug => tracing::debug!(?area, ?server_id, "{message}"),
        }
    }
}

/// A record captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub area: AreaType,
    pub server_id: Option<u64>,
    pub message: String,
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.records
            .lock()
            .map(|r| r.iter().filter(|rec| rec.level == level).count())
            .unwrap_or(0)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.records
            .lock()
            .map(|r| r.iter().any(|rec| rec.message.contains(needle)))
            .unwrap_or(false)
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: LogLevel, area: AreaType, server_id: Option<u64>, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                area,
                server_id,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.write(LogLevel::Error, AreaType::NetLib, Some(3), "socket reset");
        sink.write(LogLevel::Info, AreaType::NetLib, None, "connected");

        assert_eq!(sink.count(LogLevel::Error), 1);
        assert!(sink.contains("reset"));
        assert!(!sink.contains("timeout"));
        let records = sink.records();
        assert_eq!(records[0].server_id, Some(3));
        assert_eq!(records[1].level, LogLevel::Info);
    }
}
