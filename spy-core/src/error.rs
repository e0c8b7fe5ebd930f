//! # Error Types
//!
//! Error handling for the redis-spy monitor session.

use std::time::Duration;
use thiserror::Error;

/// Error types that can occur while observing a redis instance.
///
/// The same type doubles as the session's termination signal: the line
/// reader publishes exactly one terminal variant on the error channel and
/// the monitor loop stops when it receives it.
///
/// # Error Categories
///
/// - **Connection Errors**: dial failures and timeouts, reported to the
///   caller of `connect`; the session never starts
/// - **Write Errors**: the subscribe request could not be written; logged,
///   never escalated
/// - **Termination Errors**: stream end, read failures, a missing
///   connection, or an externally injected termination; these end the loop
/// - **Configuration Errors**: invalid addresses and settings
///
/// # Examples
///
/// ```rust
/// use spy_core::SpyError;
///
/// let error = SpyError::StreamEnded;
/// assert!(error.is_terminal());
/// ```
#[derive(Error, Debug)]
pub enum SpyError {
    /// Transport-level dial failure
    #[error("Failed to connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    /// Dial did not complete in time
    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// A session already holds a connection
    #[error("Already connected to {addr}")]
    AlreadyConnected { addr: String },

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// The client already ran a session and was torn down
    #[error("Session already closed; connection handles are never reused")]
    SessionClosed,

    /// The subscribe request could not be written
    #[error("Write error: {message}")]
    Write { message: String },

    /// The monitored stream reached end-of-file
    #[error("Stream ended")]
    StreamEnded,

    /// Any transport error other than end-of-file while reading the stream
    #[error("Stream read error: {message}")]
    StreamRead { message: String },

    /// The line reader was started without a connection to read from
    #[error("Connection not available")]
    ConnectionUnavailable,

    /// Termination injected from outside the session
    #[error("Monitor terminated: {reason}")]
    Terminated { reason: String },

    /// A session runs exactly one line reader
    #[error("Line reader already started for this session")]
    ReaderAlreadyStarted,

    /// An address string could not be parsed
    #[error("Invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    /// Configuration value rejected by validation
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system or network I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results in the redis-spy crates.
pub type Result<T> = std::result::Result<T, SpyError>;

impl SpyError {
    /// Creates a new connect error for the given address.
    pub fn connect(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Creates a new write error with the given message.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Creates a new stream read error with the given message.
    pub fn stream_read(message: impl Into<String>) -> Self {
        Self::StreamRead {
            message: message.into(),
        }
    }

    /// Creates an externally injected termination.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use spy_core::SpyError;
    ///
    /// let error = SpyError::terminated("SIGINT");
    /// assert_eq!(error.to_string(), "Monitor terminated: SIGINT");
    /// ```
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self::Terminated {
            reason: reason.into(),
        }
    }

    /// Creates a new configuration error with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new address parse error.
    pub fn invalid_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error ends a monitor session when it arrives on the
    /// error channel.
    ///
    /// Connect, write and configuration errors never travel over the error
    /// channel; they are reported at the point of occurrence instead.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamEnded
                | Self::StreamRead { .. }
                | Self::ConnectionUnavailable
                | Self::Terminated { .. }
        )
    }
}
