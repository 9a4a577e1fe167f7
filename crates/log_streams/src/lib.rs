//! `log_streams` provides leveled, structured logging with per-execution-context buffering of
//! debug records.
//!
//! It offers:
//! - A [`Logger`] that gates records by level and hands them to a [`LogSink`].
//! - A [`ContextLogger`] that withholds debug records per execution context and, when an error
//!   is logged in the same context, replays them at [`Level::Info`] right after the error record.
//!   Contexts that finish without error discard their pending records.
//! - A [`BufferRegistry`] owning the withheld records of every execution context.
//! - Sinks writing records as JSON lines ([`JsonWriterSink`]) or forwarding them to
//!   [`tracing`] ([`TracingSink`]).
//!
//! The caller's execution context is supplied through the [`ExecutionIdProvider`] trait, so the
//! crate can be combined with whatever context propagation mechanism the application uses.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use log_streams::{
//!     ContextLogger, ContextLoggerConfig, Level, LogEvent, LoggedError, LoggerConfig,
//!     TracingSink,
//! };
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("card declined")]
//! struct CardDeclined;
//!
//! let config = ContextLoggerConfig {
//!     logger: LoggerConfig {
//!         level: Level::Info,
//!         ..LoggerConfig::default()
//!     },
//!     enable_log_streams: true,
//! };
//!
//! let logger = ContextLogger::new(config, Arc::new(TracingSink), Arc::new(|| "req-1".to_owned()))
//!     .expect("valid logger configuration");
//!
//! // Withheld: nothing reaches the sink yet.
//! logger.debug(LogEvent::new("loaded_cart").with_details("3 items"));
//! assert!(logger.has_pending_logs());
//!
//! // Emits the error record, then replays `loaded_cart` at INFO level.
//! logger.error(LogEvent::new("charge_failed"), LoggedError::plain(&CardDeclined));
//! assert!(!logger.has_pending_logs());
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod context;
mod formatter;
mod identity;
mod level;
mod logger;
mod record;
mod registry;
mod sink;

use serde::Deserialize;

#[cfg(feature = "subscriber")]
pub use self::{
    identity::RootSpanExecutionId,
    sink::{JsonSinkConfig, JsonWriterSink, build_console_sink},
};
pub use self::{
    context::{ContextLogger, ContextLoggerConfig, LogStreamGuard},
    formatter::{
        AttachmentProducer, BoxError, ErrorFields, LoggedError, RecordFormatter, serialize_error,
    },
    identity::{ExecutionIdProvider, NO_CONTEXT, SENTINEL_EXECUTION_IDS, is_sentinel},
    level::{Level, LevelGate, should_emit},
    logger::{Logger, LoggerConfig},
    record::{ErrorDetails, LogEvent, LogRecord},
    registry::{BufferHandle, BufferRegistry, ContextBuffer, RECORD_SEPARATOR},
    sink::{LogSink, RenderHints, TracingSink},
};

mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const TIME: &str = "time";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const EVENT: &str = "event";
    pub(crate) const ATTACHMENTS: &str = "attachments";

    pub(crate) const EVENT_NAME: &str = "name";
    pub(crate) const EVENT_DETAILS: &str = "details";
    pub(crate) const EVENT_ERROR: &str = "error";

    pub(crate) const ERROR_TYPE: &str = "type";
    pub(crate) const ERROR_MESSAGE: &str = "message";

    /// Keys that attachments must not use, since they may be flattened next to these.
    pub(crate) static RESERVED_RECORD_KEYS: LazyLock<FxHashSet<&'static str>> =
        LazyLock::new(|| [TIME, LEVEL, EVENT].iter().copied().collect());

    pub(crate) static RESERVED_EVENT_KEYS: LazyLock<FxHashSet<&'static str>> =
        LazyLock::new(|| {
            [EVENT_NAME, EVENT_DETAILS, EVENT_ERROR]
                .iter()
                .copied()
                .collect()
        });
}

/// Defines how attachments are placed in the JSON log output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdditionalFieldsPlacement {
    /// Log all attachments at the top level of the JSON object.
    TopLevel,

    /// Nest all attachments under the specified key.
    Nested(String),
}

/// Errors that can occur within the logger.
///
/// These are only ever returned while constructing loggers and sinks; logging calls themselves
/// never fail.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Represents an unrecognized level name.
    #[error("Invalid log level `{0}`, expected one of `debug`, `info`, `warn` or `error`")]
    InvalidLevel(String),

    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// Represents an error while writing a record.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
