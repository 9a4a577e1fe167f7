//! The direct logger: a level gate, a record formatter and a sink.

use std::sync::Arc;

use serde::Deserialize;

use crate::{
    Level, LoggerError,
    formatter::{AttachmentProducer, LoggedError, RecordFormatter},
    level::LevelGate,
    record::{LogEvent, LogRecord},
    sink::{LogSink, RenderHints},
};

/// Configuration shared by [`Logger`] and [`ContextLogger`][crate::ContextLogger].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Master switch; when `false` nothing is emitted at all.
    pub is_enabled: bool,

    /// Minimum level of records forwarded to the sink.
    pub level: Level,

    /// Produces fields attached to every record, such as request-scoped identifiers.
    #[serde(skip)]
    pub attachment_producer: Option<AttachmentProducer>,

    /// Asks the sink for human-friendly rendering. Does not affect which records are emitted.
    pub pretty_log: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            is_enabled: true,
            level: Level::Info,
            attachment_producer: None,
            pretty_log: false,
        }
    }
}

/// Emits records immediately, subject to the configured level and enabled switch.
#[allow(missing_debug_implementations)] // `sink` is a `dyn Trait` object
pub struct Logger {
    gate: LevelGate,
    formatter: RecordFormatter,
    hints: RenderHints,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    /// Creates a logger writing to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Configuration`] if the attachment producer yields a reserved key.
    pub fn new(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Result<Self, LoggerError> {
        let formatter = RecordFormatter::new(config.attachment_producer)?;

        Ok(Self {
            gate: LevelGate::new(config.level, config.is_enabled),
            formatter,
            hints: RenderHints {
                pretty: config.pretty_log,
            },
            sink,
        })
    }

    /// Logs a debug record.
    pub fn debug(&self, event: impl Into<LogEvent>) {
        self.log(Level::Debug, event.into());
    }

    /// Logs an informational record.
    pub fn info(&self, event: impl Into<LogEvent>) {
        self.log(Level::Info, event.into());
    }

    /// Logs a warning record.
    pub fn warn(&self, event: impl Into<LogEvent>) {
        self.log(Level::Warn, event.into());
    }

    /// Logs an error record carrying the serialized `error`.
    pub fn error(&self, event: impl Into<LogEvent>, error: LoggedError<'_>) {
        if self.gate.allows(Level::Error) {
            let record = self.formatter.format_error(event.into(), error);
            self.sink.emit(&record, self.hints);
        }
    }

    /// Logs a record at `level`.
    pub fn log(&self, level: Level, event: LogEvent) {
        if self.gate.allows(level) {
            let record = self.formatter.format(level, event);
            self.sink.emit(&record, self.hints);
        }
    }

    /// Emits an already formatted record regardless of the level threshold.
    ///
    /// Only the enabled switch applies. Used for records replayed from a context buffer, which
    /// must surface even when the threshold is above their level.
    pub fn emit_unfiltered(&self, record: &LogRecord) {
        if self.gate.is_enabled() {
            self.sink.emit(record, self.hints);
        }
    }

    /// The level gate of this logger.
    pub fn gate(&self) -> LevelGate {
        self.gate
    }

    /// The record formatter of this logger.
    pub fn formatter(&self) -> &RecordFormatter {
        &self.formatter
    }
}
