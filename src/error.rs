//! Error handling for the RP1 I/O control crate.
//!
//! Components return [`Result`]. At the outer boundary the caller collects
//! failures into an [`ErrorLog`], which keeps every message of an error chain
//! instead of only the first one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A specialized `Result` type for RP1 I/O operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Reserved register value reported when a register read fails.
pub const REGISTER_SENTINEL: u32 = u32::MAX;

/// Reserved line value reported when a line read fails.
pub const LEVEL_SENTINEL: i8 = -1;

/// The main error type for RP1 I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Caller input violates a physical or range constraint
    #[error("validation error: {0}")]
    Validation(String),

    /// Opening a device, an ioctl or a mapping failed
    #[error("resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Ownership violation on a line handle or subscription
    #[error("state error: {0}")]
    State(String),

    /// A bounded wait expired
    #[error("timeout: {0}")]
    Timeout(String),

    /// Polling or reading an event handle failed
    #[error("poll error: {message}")]
    Poll {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// An unexpected edge sequence was observed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Payload checksum mismatch
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    /// Configuration or logging set-up failed
    #[error("configuration error: {0}")]
    Config(String),

    /// An outer operation wrapping a lower-level failure
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: Box<ControlError>,
    },
}

/// The taxonomy kind of a [`ControlError`], independent of context layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Resource,
    State,
    Timeout,
    Poll,
    Protocol,
    Checksum,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Resource => "ResourceError",
            ErrorKind::State => "StateError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Poll => "PollError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Checksum => "ChecksumError",
            ErrorKind::Config => "ConfigError",
        };
        f.write_str(name)
    }
}

impl ControlError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new resource error without an OS cause
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a new resource error caused by an OS error
    pub fn resource_io(msg: impl Into<String>, source: std::io::Error) -> Self {
        Self::Resource {
            message: msg.into(),
            source: Some(source),
        }
    }

    /// Create a new state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new poll error without an OS cause
    pub fn poll(msg: impl Into<String>) -> Self {
        Self::Poll {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a new poll error caused by an OS error
    pub fn poll_io(msg: impl Into<String>, source: std::io::Error) -> Self {
        Self::Poll {
            message: msg.into(),
            source: Some(source),
        }
    }

    /// Create a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap this error with an outer message.
    pub fn context(self, msg: impl Into<String>) -> Self {
        Self::Context {
            message: msg.into(),
            source: Box::new(self),
        }
    }

    /// The taxonomy kind, looking through any context layers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Validation(_) => ErrorKind::Validation,
            ControlError::Resource { .. } => ErrorKind::Resource,
            ControlError::State(_) => ErrorKind::State,
            ControlError::Timeout(_) => ErrorKind::Timeout,
            ControlError::Poll { .. } => ErrorKind::Poll,
            ControlError::Protocol(_) => ErrorKind::Protocol,
            ControlError::Checksum { .. } => ErrorKind::Checksum,
            ControlError::Config(_) => ErrorKind::Config,
            ControlError::Context { source, .. } => source.kind(),
        }
    }

    /// Every message in the error chain, outermost first.
    pub fn messages(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current: Option<&(dyn std::error::Error + 'static)> =
            std::error::Error::source(self);
        while let Some(err) = current {
            messages.push(err.to_string());
            current = err.source();
        }
        messages
    }
}

/// Extension for attaching outer context to a fallible result.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with `msg`.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Wrap the error, if any, with a lazily built message.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(msg))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Caller-supplied, growable list of diagnostics.
///
/// Every failure recorded here contributes all messages of its chain, so a
/// front end can display the full picture instead of the first error only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLog {
    entries: Vec<String>,
}

impl ErrorLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a free-form diagnostic.
    pub fn push(&mut self, msg: impl Into<String>) {
        self.entries.push(msg.into());
    }

    /// Append every message of `err`.
    pub fn push_error(&mut self, err: &ControlError) {
        self.entries.extend(err.messages());
    }

    /// Convert `result` into an option, recording the error chain on failure.
    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.push_error(&err);
                None
            }
        }
    }

    /// Convert `result` into a success flag.
    pub fn succeeded<T>(&mut self, result: Result<T>) -> bool {
        self.record(result).is_some()
    }

    /// Register value, or [`REGISTER_SENTINEL`] on failure.
    pub fn register_value(&mut self, result: Result<u32>) -> u32 {
        self.record(result).unwrap_or(REGISTER_SENTINEL)
    }

    /// Line level as 0/1, or [`LEVEL_SENTINEL`] on failure.
    pub fn level_value(&mut self, result: Result<bool>) -> i8 {
        match self.record(result) {
            Some(true) => 1,
            Some(false) => 0,
            None => LEVEL_SENTINEL,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sees_through_context() {
        let err = ControlError::protocol("missing falling edge")
            .context("bit 3")
            .context("DHT11 read failed");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.messages().len(), 3);
        assert_eq!(err.messages()[0], "DHT11 read failed");
    }

    #[test]
    fn test_error_log_accumulates_chain() {
        let mut log = ErrorLog::new();
        let failed: Result<()> = Err(ControlError::resource_io(
            "line handle request failed",
            std::io::Error::from_raw_os_error(16),
        )
        .context("set_high(17)"));
        assert!(!log.succeeded(failed));
        assert_eq!(log.len(), 3);
        assert!(log.entries()[1].contains("line handle request failed"));

        assert!(log.succeeded(Ok(())));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_sentinels_are_distinct_from_values() {
        let mut log = ErrorLog::new();
        assert_eq!(log.level_value(Ok(true)), 1);
        assert_eq!(log.level_value(Ok(false)), 0);
        assert_eq!(
            log.level_value(Err(ControlError::timeout("no edge"))),
            LEVEL_SENTINEL
        );
        assert_eq!(
            log.register_value(Err(ControlError::resource("unmapped"))),
            REGISTER_SENTINEL
        );
        assert_eq!(log.register_value(Ok(0x1234)), 0x1234);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_checksum_display() {
        let err = ControlError::Checksum {
            expected: 0x4A,
            actual: 0x4B,
        };
        assert_eq!(err.to_string(), "checksum mismatch: expected 0x4A, got 0x4B");
        assert_eq!(err.kind().to_string(), "ChecksumError");
    }
}
