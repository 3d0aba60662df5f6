//! Capture of `tracing` events into a shareable in-memory buffer.
//!
//! Install a [`BufferLayer`] next to the usual stderr formatter and hand the
//! returned [`LogBuffer`] to a frontend. The web server serves its contents
//! at `/api/logs` so cleanup decisions can be inspected without shell access.
//!
//! ```
//! use chatwin::logging::BufferLayer;
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let (layer, buffer) = BufferLayer::new();
//! let subscriber = tracing_subscriber::registry().with(layer);
//! tracing::subscriber::with_default(subscriber, || {
//!     tracing::info!(conversation = "c1", "evicted 3 messages");
//! });
//! assert_eq!(buffer.recent(10)[0].message, "evicted 3 messages {conversation=c1}");
//! ```

use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::registry::LookupSpan;

/// Buffer size that triggers a trim.
pub const MAX_LOG_LINES: usize = 2000;

/// Number of lines kept after a trim.
pub const LOG_TRIM_TO: usize = 1200;

/// A single log line captured from tracing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub time: String,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

/// Log severity level (mirrors tracing levels).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Short fixed-width label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl LogLine {
    /// `HH:MM:SS LEVEL message`, as a terminal frontend would print it.
    pub fn to_display_string(&self) -> String {
        format!("{} {} {}", self.time, self.level.label(), self.message)
    }
}

/// A shared, capped buffer of captured log lines.
///
/// Cloning shares the same underlying buffer.
#[derive(Clone, Debug, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<LogLine>>>);

impl LogBuffer {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::with_capacity(128))))
    }

    /// Append a line, trimming the oldest entries once the cap is exceeded.
    pub fn push(&self, line: LogLine) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.push(line);
        if buf.len() > MAX_LOG_LINES {
            let trim_to = buf.len() - LOG_TRIM_TO;
            buf.drain(..trim_to);
        }
    }

    /// Copy of the newest `limit` lines, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogLine> {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let skip = buf.len().saturating_sub(limit);
        buf.iter().skip(skip).cloned().collect()
    }

    /// Remove and return every buffered line.
    pub fn drain(&self) -> Vec<LogLine> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buf)
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`tracing_subscriber::Layer`] that records events into a [`LogBuffer`].
pub struct BufferLayer {
    buffer: LogBuffer,
    min_level: LogLevel,
}

impl BufferLayer {
    /// Create a layer capturing `DEBUG` and above, with its buffer.
    pub fn new() -> (Self, LogBuffer) {
        Self::with_buffer(LogBuffer::new())
    }

    /// Create a layer writing into an existing buffer.
    pub fn with_buffer(buffer: LogBuffer) -> (Self, LogBuffer) {
        (
            Self {
                buffer: buffer.clone(),
                min_level: LogLevel::Debug,
            },
            buffer,
        )
    }

    /// Ignore events below `level`.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for BufferLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());
        if level < self.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            let extras: Vec<String> = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            if message.is_empty() {
                message = extras.join(" ");
            } else {
                message = format!("{message} {{{}}}", extras.join(", "));
            }
        }

        self.buffer.push(LogLine {
            time: Local::now().format("%H:%M:%S").to_string(),
            level,
            target: metadata.target().to_string(),
            message,
        });
    }
}

/// Visitor that extracts the message and extra fields from a tracing event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        let text = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(raw);
        if field.name() == "message" {
            self.message = text;
        } else {
            self.fields.push((field.name().to_string(), text));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn line(message: &str) -> LogLine {
        LogLine {
            time: "00:00:00".into(),
            level: LogLevel::Info,
            target: "test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn captures_message_and_fields() {
        let (layer, buffer) = BufferLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(removed = 3, "cleanup done");
            tracing::warn!("store unavailable");
        });

        let lines = buffer.recent(10);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "cleanup done {removed=3}");
        assert_eq!(lines[0].level, LogLevel::Info);
        assert_eq!(lines[1].level, LogLevel::Warn);
    }

    #[test]
    fn min_level_filters_events() {
        let (layer, buffer) = BufferLayer::new();
        let layer = layer.with_min_level(LogLevel::Warn);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("noise");
            tracing::info!("more noise");
            tracing::error!("signal");
        });
        let lines = buffer.drain();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message, "signal");
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_trims_when_over_cap() {
        let buffer = LogBuffer::new();
        for i in 0..=MAX_LOG_LINES {
            buffer.push(line(&format!("line {i}")));
        }
        assert_eq!(buffer.len(), LOG_TRIM_TO);
        let newest = buffer.recent(1);
        assert_eq!(newest[0].message, format!("line {MAX_LOG_LINES}"));
    }

    #[test]
    fn recent_returns_newest_in_order() {
        let buffer = LogBuffer::new();
        for msg in ["a", "b", "c"] {
            buffer.push(line(msg));
        }
        let msgs: Vec<String> = buffer.recent(2).into_iter().map(|l| l.message).collect();
        assert_eq!(msgs, vec!["b", "c"]);
        assert_eq!(buffer.recent(10).len(), 3);
    }

    #[test]
    fn level_labels_are_fixed_width() {
        assert_eq!(LogLevel::Info.label(), "INFO ");
        assert_eq!(LogLevel::Error.label(), "ERROR");
        assert_eq!(line("x").to_display_string(), "00:00:00 INFO  x");
    }
}
