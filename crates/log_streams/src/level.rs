//! Severity levels and the gate deciding whether a record reaches the sink.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::LoggerError;

/// Severity of a log record, ordered `Debug < Info < Warn < Error`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Diagnostic noise, possibly withheld until an error occurs.
    Debug,

    /// Routine information.
    #[default]
    Info,

    /// Something unexpected that did not fail the operation.
    Warn,

    /// A failure.
    Error,
}

impl Level {
    /// Returns the uppercase name used in serialized records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(LoggerError::InvalidLevel(s.to_owned())),
        }
    }
}

// Accepts any casing, so both configuration files (`level = "debug"`) and serialized records
// (`"level": "DEBUG"`) parse.
impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl From<Level> for tracing::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => Self::DEBUG,
            Level::Info => Self::INFO,
            Level::Warn => Self::WARN,
            Level::Error => Self::ERROR,
        }
    }
}

/// Returns `true` if a record logged at `record_level` should be forwarded to the sink.
///
/// Records are rejected when emission is disabled, or when `record_level` is strictly below
/// `threshold`.
#[inline]
pub fn should_emit(record_level: Level, threshold: Level, is_enabled: bool) -> bool {
    is_enabled && record_level >= threshold
}

/// A configured threshold together with the master enabled switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelGate {
    threshold: Level,
    is_enabled: bool,
}

impl LevelGate {
    /// Creates a gate forwarding records at or above `threshold` while `is_enabled` holds.
    pub const fn new(threshold: Level, is_enabled: bool) -> Self {
        Self {
            threshold,
            is_enabled,
        }
    }

    /// Checks a record level against this gate.
    #[inline]
    pub fn allows(self, level: Level) -> bool {
        should_emit(level, self.threshold, self.is_enabled)
    }

    /// The configured minimum level.
    pub fn threshold(self) -> Level {
        self.threshold
    }

    /// Whether emission is switched on at all.
    pub fn is_enabled(self) -> bool {
        self.is_enabled
    }
}
