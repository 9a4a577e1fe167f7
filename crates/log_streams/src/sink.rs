//! Destinations for emitted records.
//!
//! Loggers hand every record that passes their level gate to a [`LogSink`]. This module provides
//! a [`TracingSink`] forwarding records into the [`tracing`] ecosystem and, with the `subscriber`
//! feature, a [`JsonWriterSink`] writing one JSON object per line to any
//! [`MakeWriter`][tracing_subscriber::fmt::MakeWriter].

use std::sync::Arc;

use crate::{Level, record::LogRecord};

/// Rendering hints forwarded from the logger configuration to the sink.
///
/// Hints are purely cosmetic; sinks are free to ignore them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderHints {
    /// Prefer multi-line, human-friendly output.
    pub pretty: bool,
}

/// A destination that renders and writes records.
///
/// Implementations must not panic: logging calls are expected to never fail.
pub trait LogSink: Send + Sync {
    /// Writes a single record.
    fn emit(&self, record: &LogRecord, hints: RenderHints);
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn emit(&self, record: &LogRecord, hints: RenderHints) {
        (**self).emit(record, hints);
    }
}

/// Re-emits records as [`tracing`] events at the matching level.
///
/// The event name becomes the `name` field and the complete serialized record the `record`
/// field, so any `tracing` subscriber layer can render them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord, hints: RenderHints) {
        let serialized = if hints.pretty {
            serde_json::to_string_pretty(record)
        } else {
            serde_json::to_string(record)
        };
        let serialized = match serialized {
            Ok(serialized) => serialized,
            Err(error) => {
                tracing::warn!("Failed to serialize log record `{}`: {error}", record.event.name);
                return;
            }
        };

        let name = record.event.name.as_str();
        match record.level {
            Level::Debug => tracing::debug!(target: "log_streams", name, record = %serialized),
            Level::Info => tracing::info!(target: "log_streams", name, record = %serialized),
            Level::Warn => tracing::warn!(target: "log_streams", name, record = %serialized),
            Level::Error => tracing::error!(target: "log_streams", name, record = %serialized),
        }
    }
}

#[cfg(feature = "subscriber")]
pub use self::json::{JsonSinkConfig, JsonWriterSink, build_console_sink};

#[cfg(feature = "subscriber")]
mod json {
    use std::io::Write;

    use serde::{
        Deserialize,
        ser::{SerializeMap, Serializer},
    };
    use serde_json::ser::{CompactFormatter, Formatter, PrettyFormatter};
    use time::format_description::well_known::Rfc3339;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::fmt::MakeWriter;

    use super::{LogSink, RenderHints};
    use crate::{AdditionalFieldsPlacement, LoggerError, keys, record::LogRecord};

    /// Configuration for a [`JsonWriterSink`].
    #[derive(Clone, Debug, Deserialize)]
    #[serde(default)]
    pub struct JsonSinkConfig {
        /// Specifies where record attachments are placed in the JSON output.
        pub attachments_placement: AdditionalFieldsPlacement,
    }

    impl Default for JsonSinkConfig {
        fn default() -> Self {
            Self {
                attachments_placement: AdditionalFieldsPlacement::Nested(
                    keys::ATTACHMENTS.to_owned(),
                ),
            }
        }
    }

    /// A [`LogSink`] writing each record as a single JSON object followed by a newline.
    ///
    /// `time` and `level` are always written at the top level, followed by the attachments
    /// (placed according to [`JsonSinkConfig::attachments_placement`]) and the `event` object.
    /// Output is compact unless the logger asks for pretty rendering.
    #[derive(Debug)]
    pub struct JsonWriterSink<W>
    where
        W: for<'a> MakeWriter<'a> + 'static,
    {
        dst_writer: W,
        attachments_placement: AdditionalFieldsPlacement,
    }

    impl<W> JsonWriterSink<W>
    where
        W: for<'a> MakeWriter<'a> + 'static,
    {
        /// Creates a new [`JsonWriterSink`] with the specified configuration and writer.
        pub fn new(config: JsonSinkConfig, dst_writer: W) -> Result<Self, LoggerError> {
            if let AdditionalFieldsPlacement::Nested(key) = &config.attachments_placement {
                if keys::RESERVED_RECORD_KEYS.contains(key.as_str()) {
                    return Err(LoggerError::Configuration(format!(
                        "A reserved key `{key}` was chosen as the attachments key of the JSON sink"
                    )));
                }
            }

            Ok(Self {
                dst_writer,
                attachments_placement: config.attachments_placement,
            })
        }

        /// Serializes a record with the given JSON formatter.
        pub fn serialize<F: Formatter>(
            &self,
            record: &LogRecord,
            formatter: F,
        ) -> Result<Vec<u8>, LoggerError> {
            let mut buffer = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
            let mut map_serializer = serializer.serialize_map(None)?;

            if let Ok(time) = record.time.format(&Rfc3339) {
                map_serializer.serialize_entry(keys::TIME, &time)?;
            }
            map_serializer.serialize_entry(keys::LEVEL, record.level.as_str())?;

            match &self.attachments_placement {
                AdditionalFieldsPlacement::TopLevel => {
                    for (key, value) in &record.attachments {
                        if keys::RESERVED_RECORD_KEYS.contains(key.as_str()) {
                            tracing::warn!(
                                "Attempting to log a reserved key `{key}` (value: `{value:?}`) \
                                 via attachments. Skipping."
                            );
                        } else {
                            map_serializer.serialize_entry(key, value)?;
                        }
                    }
                }
                AdditionalFieldsPlacement::Nested(field_name) => {
                    if !record.attachments.is_empty() {
                        map_serializer.serialize_entry(field_name.as_str(), &record.attachments)?;
                    }
                }
            }

            map_serializer.serialize_entry(keys::EVENT, &record.event)?;
            map_serializer.end()?;
            Ok(buffer)
        }

        /// Serializes and writes a record, reporting failures instead of logging them.
        pub fn write(&self, record: &LogRecord, hints: RenderHints) -> Result<(), LoggerError> {
            let serialized = if hints.pretty {
                self.serialize(record, PrettyFormatter::new())?
            } else {
                self.serialize(record, CompactFormatter)?
            };
            Ok(self.flush(serialized)?)
        }

        /// Flush memory buffer into an output stream with a trailing newline.
        ///
        /// Should be done by a single `write_all` call to avoid fragmentation of log because of
        /// multithreading.
        fn flush(&self, mut buffer: Vec<u8>) -> Result<(), std::io::Error> {
            buffer.write_all(b"\n")?;
            self.dst_writer.make_writer().write_all(&buffer)
        }
    }

    impl<W> LogSink for JsonWriterSink<W>
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        fn emit(&self, record: &LogRecord, hints: RenderHints) {
            if let Err(error) = self.write(record, hints) {
                tracing::warn!("Failed to write log record `{}`: {error}", record.event.name);
            }
        }
    }

    /// Builds a [`JsonWriterSink`] writing to standard output through a non-blocking worker.
    ///
    /// Records are written as long as the returned [`WorkerGuard`] is in scope.
    pub fn build_console_sink(
        config: JsonSinkConfig,
    ) -> Result<(JsonWriterSink<NonBlocking>, WorkerGuard), LoggerError> {
        let (non_blocking_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        let sink = JsonWriterSink::new(config, non_blocking_stdout)?;
        Ok((sink, guard))
    }

}
