//! The canonical shape of a log record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::Level;

/// A single formatted log record.
///
/// This is also the representation stored in context buffers, so it round-trips through
/// `serde_json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Time at which the record was formatted, in UTC.
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,

    /// Severity at which the record is (or was last) emitted.
    pub level: Level,

    /// Fields contributed by the configured attachment producer.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attachments: HashMap<String, String>,

    /// The caller-supplied payload.
    pub event: LogEvent,
}

impl LogRecord {
    /// Returns `true` if this record carries a serialized error.
    pub fn is_error_record(&self) -> bool {
        self.event.error.is_some()
    }
}

/// The per-call payload of a log record.
///
/// ```
/// use log_streams::LogEvent;
/// use serde_json::json;
///
/// let event = LogEvent::new("payment_confirmed")
///     .with_details("confirmed by issuer")
///     .with_field("attempt", json!(2));
///
/// assert_eq!(event.name, "payment_confirmed");
/// assert_eq!(event.extra.get("attempt"), Some(&json!(2)));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Short machine-friendly name of what happened.
    pub name: String,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Serialized error, present only on error records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,

    /// Any other caller-supplied fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEvent {
    /// Creates an event with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the human-readable details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Adds an extra field to the event.
    ///
    /// The keys `name`, `details` and `error` are part of the event itself; extra fields using
    /// them are skipped with a warning.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if crate::keys::RESERVED_EVENT_KEYS.contains(key.as_str()) {
            tracing::warn!(
                "Attempting to add a reserved event key `{key}` as an extra field. Skipping."
            );
        } else {
            self.extra.insert(key, value.into());
        }
        self
    }
}

impl From<&str> for LogEvent {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for LogEvent {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// The serialized shape of an error attached to an error record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Category name of the error.
    #[serde(rename = "type")]
    pub kind: String,

    /// Display message of the error.
    pub message: String,

    /// Fields contributed by the error itself.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
