//! Turns per-call payloads into [`LogRecord`]s.
//!
//! The formatter merges the attachments produced by the configured [`AttachmentProducer`], the
//! caller's [`LogEvent`] and the current UTC time. For error records it also serializes a
//! [`LoggedError`], consulting the error's own [`ErrorFields`] capability when it has one.

use std::{
    any::type_name,
    collections::HashMap,
    error::Error as StdError,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
    Level, LoggerError,
    record::{ErrorDetails, LogEvent, LogRecord},
};

/// Boxed error returned by an [`ErrorFields`] implementation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A zero-argument function producing fields that are attached to every record.
#[derive(Clone)]
pub struct AttachmentProducer(Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>);

impl AttachmentProducer {
    /// Wraps a closure as an attachment producer.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn() -> HashMap<String, String> + Send + Sync + 'static,
    {
        Self(Arc::new(producer))
    }

    /// Invokes the producer.
    pub fn produce(&self) -> HashMap<String, String> {
        (self.0)()
    }
}

impl fmt::Debug for AttachmentProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttachmentProducer").finish_non_exhaustive()
    }
}

/// An error that knows how to describe itself with additional structured fields.
///
/// The returned value is expected to be a JSON object; its entries extend the base
/// `{ "type", "message" }` fields of the serialized error, and may override them with string
/// values.
pub trait ErrorFields: StdError {
    /// Produces the additional fields describing this error.
    fn error_fields(&self) -> Result<Value, BoxError>;
}

/// An error value handed to an `error` logging call.
#[derive(Clone, Copy)]
pub enum LoggedError<'a> {
    /// An error that is serialized from its category name and message only.
    Plain {
        /// Category name of the error.
        kind: &'a str,

        /// The error value.
        error: &'a (dyn StdError + 'a),
    },

    /// An error that additionally contributes its own fields.
    FieldProducing {
        /// Category name of the error.
        kind: &'a str,

        /// The error value.
        error: &'a (dyn ErrorFields + 'a),
    },
}

impl<'a> LoggedError<'a> {
    /// Wraps an error, using its unqualified type name as the category name.
    pub fn plain<E: StdError + 'a>(error: &'a E) -> Self {
        Self::Plain {
            kind: short_type_name::<E>(),
            error,
        }
    }

    /// Wraps an error exposing [`ErrorFields`], using its unqualified type name as the category
    /// name.
    pub fn with_fields<E: ErrorFields + 'a>(error: &'a E) -> Self {
        Self::FieldProducing {
            kind: short_type_name::<E>(),
            error,
        }
    }

    /// Overrides the category name.
    #[must_use]
    pub fn named(self, name: &'a str) -> Self {
        match self {
            Self::Plain { error, .. } => Self::Plain { kind: name, error },
            Self::FieldProducing { error, .. } => Self::FieldProducing { kind: name, error },
        }
    }

    fn kind(&self) -> &'a str {
        match self {
            Self::Plain { kind, .. } | Self::FieldProducing { kind, .. } => kind,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Plain { error, .. } => error.to_string(),
            Self::FieldProducing { error, .. } => error.to_string(),
        }
    }
}

impl fmt::Debug for LoggedError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Plain { .. } => "Plain",
            Self::FieldProducing { .. } => "FieldProducing",
        };
        f.debug_struct(variant)
            .field("kind", &self.kind())
            .field("message", &self.message())
            .finish()
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    // Strip generic parameters before taking the last path segment.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Builds [`LogRecord`]s from caller payloads.
#[derive(Clone, Debug, Default)]
pub struct RecordFormatter {
    attachment_producer: Option<AttachmentProducer>,
}

impl RecordFormatter {
    /// Creates a formatter, validating the attachment producer if one is configured.
    ///
    /// The producer is invoked once; attachment keys colliding with the top-level record keys
    /// are rejected so they can never shadow `time`, `level` or `event` when attachments are
    /// flattened by a sink.
    pub fn new(attachment_producer: Option<AttachmentProducer>) -> Result<Self, LoggerError> {
        if let Some(producer) = &attachment_producer {
            let probe = catch_unwind(AssertUnwindSafe(|| producer.produce())).map_err(|_| {
                LoggerError::Configuration(
                    "The attachment producer panicked while being validated".to_owned(),
                )
            })?;

            if let Some(key) = probe
                .keys()
                .find(|key| crate::keys::RESERVED_RECORD_KEYS.contains(key.as_str()))
            {
                return Err(LoggerError::Configuration(format!(
                    "A reserved key `{key}` was produced by the attachment producer"
                )));
            }
        }

        Ok(Self {
            attachment_producer,
        })
    }

    /// Formats a record at the given level.
    ///
    /// Extra event fields named like the event's own fields (`name`, `details`, `error`) are
    /// dropped with a warning, so that the record parses back into the same shape.
    pub fn format(&self, level: Level, mut event: LogEvent) -> LogRecord {
        event.extra.retain(|key, value| {
            let reserved = crate::keys::RESERVED_EVENT_KEYS.contains(key.as_str());
            if reserved {
                tracing::warn!(
                    "Attempting to log a reserved event key `{key}` (value: {value}) as an extra \
                     field. Skipping."
                );
            }
            !reserved
        });

        LogRecord {
            time: OffsetDateTime::now_utc(),
            level,
            attachments: self.attachments(),
            event,
        }
    }

    /// Formats an error-level record carrying the serialized `error`.
    pub fn format_error(&self, mut event: LogEvent, error: LoggedError<'_>) -> LogRecord {
        event.error = Some(serialize_error(error));
        self.format(Level::Error, event)
    }

    fn attachments(&self) -> HashMap<String, String> {
        let Some(producer) = &self.attachment_producer else {
            return HashMap::new();
        };

        match catch_unwind(AssertUnwindSafe(|| producer.produce())) {
            Ok(mut attachments) => {
                attachments.retain(|key, value| {
                    let reserved = crate::keys::RESERVED_RECORD_KEYS.contains(key.as_str());
                    if reserved {
                        tracing::warn!(
                            "Attempting to attach a reserved key `{key}` (value: {value:?}). \
                             Skipping."
                        );
                    }
                    !reserved
                });
                attachments
            }
            Err(_) => {
                tracing::warn!("The attachment producer panicked; logging without attachments");
                HashMap::new()
            }
        }
    }
}

/// Serializes an error into its `{ type, message, .. }` shape.
///
/// Never fails: when the error's own field producer fails, panics, or does not return a JSON
/// object, only the base fields are used.
pub fn serialize_error(error: LoggedError<'_>) -> ErrorDetails {
    let mut details = ErrorDetails {
        kind: error.kind().to_owned(),
        message: error.message(),
        extra: Map::new(),
    };

    let LoggedError::FieldProducing { error: source, .. } = error else {
        return details;
    };

    let produced = match catch_unwind(AssertUnwindSafe(|| source.error_fields())) {
        Ok(Ok(Value::Object(fields))) => fields,
        Ok(Ok(other)) => {
            tracing::warn!(
                error_type = %details.kind,
                "Error field producer returned a non-object value ({other}); using base fields"
            );
            return details;
        }
        Ok(Err(producer_error)) => {
            tracing::warn!(
                error_type = %details.kind,
                "Error field producer failed: {producer_error}; using base fields"
            );
            return details;
        }
        Err(_) => {
            tracing::warn!(
                error_type = %details.kind,
                "Error field producer panicked; using base fields"
            );
            return details;
        }
    };

    for (key, value) in produced {
        match key.as_str() {
            crate::keys::ERROR_TYPE | crate::keys::ERROR_MESSAGE => {
                let Value::String(text) = value else {
                    tracing::warn!(
                        "Error field producer returned a non-string `{key}` (value: {value}). \
                         Skipping."
                    );
                    continue;
                };
                if key == crate::keys::ERROR_TYPE {
                    details.kind = text;
                } else {
                    details.message = text;
                }
            }
            _ => {
                details.extra.insert(key, value);
            }
        }
    }

    details
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use serde_json::json;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("Oops")]
    struct PlainError;

    #[derive(Debug, thiserror::Error)]
    #[error("gateway timed out")]
    struct GatewayError {
        produce: fn() -> Result<Value, BoxError>,
    }

    impl ErrorFields for GatewayError {
        fn error_fields(&self) -> Result<Value, BoxError> {
            (self.produce)()
        }
    }

    fn gateway(produce: fn() -> Result<Value, BoxError>) -> GatewayError {
        GatewayError { produce }
    }

    #[test]
    fn plain_errors_use_type_name_and_message() {
        let details = serialize_error(LoggedError::plain(&PlainError));

        assert_eq!(details.kind, "PlainError");
        assert_eq!(details.message, "Oops");
        assert!(details.extra.is_empty());
    }

    #[test]
    fn named_overrides_the_category() {
        let io = std::io::Error::other("disk full");
        let details = serialize_error(LoggedError::plain(&io).named("IoError"));

        assert_eq!(details.kind, "IoError");
        assert_eq!(details.message, "disk full");
    }

    #[test]
    fn produced_fields_extend_and_override_base_fields() {
        let error = gateway(|| Ok(json!({ "status": 504, "message": "upstream timeout" })));
        let details = serialize_error(LoggedError::with_fields(&error));

        assert_eq!(details.kind, "GatewayError");
        assert_eq!(details.message, "upstream timeout");
        assert_eq!(details.extra.get("status"), Some(&json!(504)));
    }

    #[test]
    fn failing_producers_degrade_to_base_fields() {
        let producers: [fn() -> Result<Value, BoxError>; 4] = [
            || Err("cannot describe".into()),
            || Ok(json!(["not", "a", "map"])),
            || Ok(json!({ "type": 42 })),
            || panic!("producer blew up"),
        ];

        for produce in producers {
            let error = gateway(produce);
            let details = serialize_error(LoggedError::with_fields(&error));

            assert_eq!(details.kind, "GatewayError");
            assert_eq!(details.message, "gateway timed out");
            assert!(details.extra.is_empty());
        }
    }

    #[test]
    fn extra_fields_shadowing_event_fields_are_dropped() {
        let formatter = RecordFormatter::default();
        let mut event = LogEvent::new("x");
        event.extra.insert("name".to_owned(), json!("shadow"));
        event.extra.insert("details".to_owned(), json!(5));
        event.extra.insert("error".to_owned(), json!("timeout"));
        event.extra.insert("attempt".to_owned(), json!(2));

        let record = formatter.format(Level::Debug, event);
        assert_eq!(record.event.extra.len(), 1);
        assert_eq!(record.event.extra.get("attempt"), Some(&json!(2)));

        let parsed: LogRecord =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(parsed.event.name, "x");
        assert!(parsed.event.error.is_none());
    }

    #[test]
    fn formatter_merges_attachments() {
        let formatter = RecordFormatter::new(Some(AttachmentProducer::new(|| {
            HashMap::from([("tenant".to_owned(), "acme".to_owned())])
        })))
        .unwrap();

        let record = formatter.format(Level::Info, LogEvent::new("x"));
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.attachments.get("tenant").map(String::as_str), Some("acme"));

        let record = formatter.format_error(LogEvent::new("e"), LoggedError::plain(&PlainError));
        assert_eq!(record.level, Level::Error);
        assert_eq!(record.event.error.unwrap().message, "Oops");
    }

    #[test]
    fn reserved_attachment_keys_fail_construction() {
        let result = RecordFormatter::new(Some(AttachmentProducer::new(|| {
            HashMap::from([("level".to_owned(), "loud".to_owned())])
        })));

        assert!(matches!(result, Err(LoggerError::Configuration(_))));
    }

    #[test]
    fn short_type_names_drop_paths_and_generics() {
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
