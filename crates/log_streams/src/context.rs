//! Context-scoped buffering of debug records.
//!
//! A [`ContextLogger`] wraps a [`Logger`]. Debug records are not emitted right away but appended
//! to the buffer of the caller's execution context. What happens to them next depends on how the
//! context continues:
//!
//! - an `error` call emits the error record, then drains the buffer and replays every withheld
//!   record at [`Level::Info`] in the order it was logged;
//! - a [`ContextLogger::delete_log_stream`] call (or dropping a [`LogStreamGuard`]) discards the
//!   buffer without emitting anything.
//!
//! A buffer that is neither flushed nor deleted stays in memory for as long as the logger lives.

use std::{fmt, sync::Arc};

use serde::Deserialize;

use crate::{
    Level, LoggerError,
    formatter::LoggedError,
    identity::{ExecutionIdProvider, is_sentinel},
    logger::{Logger, LoggerConfig},
    record::LogEvent,
    registry::{BufferRegistry, ContextBuffer},
    sink::LogSink,
};

/// Configuration of a [`ContextLogger`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ContextLoggerConfig {
    /// Configuration of the wrapped logger.
    #[serde(flatten)]
    pub logger: LoggerConfig,

    /// If `true`, debug records are buffered per execution context; if `false`, they are
    /// emitted directly like with a plain [`Logger`].
    pub enable_log_streams: bool,
}

impl Default for ContextLoggerConfig {
    fn default() -> Self {
        Self {
            logger: LoggerConfig::default(),
            enable_log_streams: true,
        }
    }
}

/// A logger withholding debug records per execution context until an error occurs.
#[allow(missing_debug_implementations)] // `identity` is a `dyn Trait` object
pub struct ContextLogger {
    logger: Logger,
    identity: Arc<dyn ExecutionIdProvider>,
    registry: BufferRegistry,
    enable_log_streams: bool,
}

impl ContextLogger {
    /// Creates a context logger writing to `sink` and querying `identity` on every call.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Configuration`] if the attachment producer yields a reserved key.
    pub fn new(
        config: ContextLoggerConfig,
        sink: Arc<dyn LogSink>,
        identity: Arc<dyn ExecutionIdProvider>,
    ) -> Result<Self, LoggerError> {
        Ok(Self::from_logger(
            Logger::new(config.logger, sink)?,
            identity,
            config.enable_log_streams,
        ))
    }

    /// Wraps an existing logger.
    pub fn from_logger(
        logger: Logger,
        identity: Arc<dyn ExecutionIdProvider>,
        enable_log_streams: bool,
    ) -> Self {
        Self {
            logger,
            identity,
            registry: BufferRegistry::new(),
            enable_log_streams,
        }
    }

    /// Logs a debug record.
    ///
    /// With log streams enabled inside an execution context, the record is withheld in the
    /// context's buffer. Otherwise it is emitted directly at [`Level::Debug`], subject to the
    /// level gate.
    pub fn debug(&self, event: impl Into<LogEvent>) {
        let event = event.into();

        let Some(id) = self.buffering_id() else {
            self.logger.log(Level::Debug, event);
            return;
        };

        let record = self.logger.formatter().format(Level::Debug, event);
        if let Err(error) = self.registry.append(&id, &record) {
            tracing::warn!(
                execution_id = %id,
                "Failed to buffer debug record `{}`: {error}. Dropping it.",
                record.event.name
            );
        }
    }

    /// Logs an informational record.
    pub fn info(&self, event: impl Into<LogEvent>) {
        self.logger.info(event);
    }

    /// Logs a warning record.
    pub fn warn(&self, event: impl Into<LogEvent>) {
        self.logger.warn(event);
    }

    /// Logs an error record, then replays the debug records withheld in the current execution
    /// context at [`Level::Info`].
    ///
    /// Replayed records bypass the level threshold, so they surface even when the logger is
    /// configured above `INFO`; only the enabled switch applies to them.
    ///
    /// The error record is always emitted first. Afterwards no buffer exists for the context.
    pub fn error(&self, event: impl Into<LogEvent>, error: LoggedError<'_>) {
        self.logger.error(event, error);

        if !self.enable_log_streams {
            return;
        }

        let id = self.identity.current_execution_id();
        if is_sentinel(&id) || !self.registry.contains(&id) {
            return;
        }

        self.replay(&id, self.registry.drain(&id));
    }

    /// Creates the buffer for the current execution context if it does not exist yet.
    ///
    /// Buffers are created lazily by [`debug`][Self::debug] anyway; this is a no-op when log
    /// streams are disabled or no execution context is active.
    pub fn create_log_stream(&self) {
        if let Some(id) = self.buffering_id() {
            self.registry.ensure(&id);
        }
    }

    /// Discards the buffer of the current execution context without emitting its records.
    ///
    /// Should be called when a context completes without error.
    pub fn delete_log_stream(&self) {
        let id = self.identity.current_execution_id();
        if !is_sentinel(&id) {
            self.registry.delete(&id);
        }
    }

    /// Creates the buffer for the current execution context and returns a guard deleting it
    /// when dropped.
    ///
    /// If an error flushes the buffer while the guard is alive, dropping the guard only removes
    /// records withheld after that error.
    #[must_use = "the log stream is deleted as soon as the guard is dropped"]
    pub fn log_stream(&self) -> LogStreamGuard<'_> {
        let id = self.buffering_id();
        if let Some(id) = &id {
            self.registry.ensure(id);
        }

        LogStreamGuard { logger: self, id }
    }

    /// Returns `true` if the current execution context has withheld records.
    pub fn has_pending_logs(&self) -> bool {
        let id = self.identity.current_execution_id();
        !is_sentinel(&id) && self.registry.has_pending(&id)
    }

    /// The registry holding the buffers of all execution contexts.
    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// The wrapped logger.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Returns the identifier to buffer debug records under, or `None` if they should be
    /// emitted directly.
    fn buffering_id(&self) -> Option<String> {
        if !self.enable_log_streams {
            return None;
        }

        let id = self.identity.current_execution_id();
        (!is_sentinel(&id)).then_some(id)
    }

    fn replay(&self, id: &str, buffer: ContextBuffer) {
        for (index, record) in buffer.records().enumerate() {
            match record {
                Ok(mut record) => {
                    record.level = Level::Info;
                    self.logger.emit_unfiltered(&record);
                }
                Err(error) => {
                    tracing::warn!(
                        execution_id = %id,
                        "Skipping malformed buffered record #{index}: {error}"
                    );
                }
            }
        }
    }
}

/// Deletes the log stream of an execution context when dropped.
pub struct LogStreamGuard<'l> {
    logger: &'l ContextLogger,
    id: Option<String>,
}

impl LogStreamGuard<'_> {
    /// The execution identifier of the guarded stream, if one is being buffered.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl fmt::Debug for LogStreamGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStreamGuard")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for LogStreamGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = &self.id {
            self.logger.registry.delete(id);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use super::*;
    use crate::logger::test_utils::MemorySink;

    #[derive(Debug, thiserror::Error)]
    #[error("Oops")]
    struct Oops;

    /// An identity provider whose current identifier can be switched by the test.
    #[derive(Debug, Default)]
    struct SwitchableId(Mutex<String>);

    impl SwitchableId {
        fn set(&self, id: &str) {
            *self.0.lock().unwrap() = id.to_owned();
        }
    }

    impl ExecutionIdProvider for SwitchableId {
        fn current_execution_id(&self) -> String {
            self.0.lock().unwrap().clone()
        }
    }

    fn context_logger(
        level: Level,
        enable_log_streams: bool,
    ) -> (ContextLogger, Arc<MemorySink>, Arc<SwitchableId>) {
        let sink = Arc::new(MemorySink::default());
        let identity = Arc::new(SwitchableId::default());
        identity.set("A");

        let config = ContextLoggerConfig {
            logger: LoggerConfig {
                level,
                ..LoggerConfig::default()
            },
            enable_log_streams,
        };
        let logger = ContextLogger::new(config, sink.clone(), identity.clone()).unwrap();
        (logger, sink, identity)
    }

    fn emitted(sink: &MemorySink) -> Vec<(Level, String)> {
        sink.records()
            .into_iter()
            .map(|record| (record.level, record.event.name))
            .collect()
    }

    #[test]
    fn config_defaults_enable_log_streams() {
        let config: ContextLoggerConfig =
            serde_json::from_str(r#"{ "level": "debug", "pretty_log": true }"#).unwrap();

        assert!(config.enable_log_streams);
        assert!(config.logger.pretty_log);
        assert_eq!(config.logger.level, Level::Debug);
    }

    #[test]
    fn sentinel_identifiers_are_never_buffered() {
        let (logger, sink, identity) = context_logger(Level::Debug, true);
        identity.set("-");

        logger.debug("x");
        logger.create_log_stream();
        logger.error("e", LoggedError::plain(&Oops));

        assert!(logger.registry().is_empty());
        assert!(!logger.has_pending_logs());
        assert_eq!(
            emitted(&sink),
            [(Level::Debug, "x".to_owned()), (Level::Error, "e".to_owned())]
        );
    }

    #[test]
    fn replays_surface_above_the_configured_threshold() {
        let (logger, sink, _identity) = context_logger(Level::Warn, true);

        logger.debug("x");
        assert!(logger.has_pending_logs());
        logger.info("skipped");
        logger.error("e", LoggedError::plain(&Oops));

        assert!(logger.registry().is_empty());
        assert_eq!(
            emitted(&sink),
            [(Level::Error, "e".to_owned()), (Level::Info, "x".to_owned())]
        );
    }

    #[test]
    fn disabled_logger_replays_nothing() {
        let sink = Arc::new(MemorySink::default());
        let config = ContextLoggerConfig {
            logger: LoggerConfig {
                is_enabled: false,
                level: Level::Debug,
                ..LoggerConfig::default()
            },
            enable_log_streams: true,
        };
        let logger =
            ContextLogger::new(config, sink.clone(), Arc::new(|| "A".to_owned())).unwrap();

        logger.debug("x");
        logger.error("e", LoggedError::plain(&Oops));

        assert!(sink.records().is_empty());
        assert!(logger.registry().is_empty());
    }

    #[test]
    fn create_log_stream_is_idempotent() {
        let (logger, sink, _identity) = context_logger(Level::Info, true);

        logger.create_log_stream();
        logger.create_log_stream();

        assert_eq!(logger.registry().len(), 1);
        assert!(!logger.has_pending_logs());

        logger.error("e", LoggedError::plain(&Oops));
        assert!(logger.registry().is_empty());
        assert_eq!(emitted(&sink), [(Level::Error, "e".to_owned())]);
    }

    #[test]
    fn guard_discards_the_stream_on_drop() {
        let (logger, sink, _identity) = context_logger(Level::Info, true);

        {
            let guard = logger.log_stream();
            assert_eq!(guard.id(), Some("A"));
            logger.debug("x");
            assert!(logger.has_pending_logs());
        }

        assert!(logger.registry().is_empty());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn malformed_segments_are_skipped_during_replay() {
        let (logger, sink, _identity) = context_logger(Level::Debug, true);

        logger.debug("x");
        logger.registry().append_segment("A", "{ not json");
        logger.debug("y");
        logger.error("e", LoggedError::plain(&Oops));

        assert_eq!(
            emitted(&sink),
            [
                (Level::Error, "e".to_owned()),
                (Level::Info, "x".to_owned()),
                (Level::Info, "y".to_owned()),
            ]
        );
        assert!(logger.registry().is_empty());
    }

    #[test]
    fn replayed_records_keep_their_original_time_and_attachments() {
        let (logger, sink, _identity) = context_logger(Level::Debug, true);

        logger.debug(LogEvent::new("x").with_details("before failure"));
        std::thread::sleep(std::time::Duration::from_millis(2));
        logger.error("e", LoggedError::plain(&Oops));

        let records = sink.records();
        let error = records.first().unwrap();
        let replayed = records.get(1).unwrap();
        assert!(replayed.time < error.time);
        assert_eq!(replayed.event.details.as_deref(), Some("before failure"));
        assert!(!replayed.is_error_record());
    }
}
