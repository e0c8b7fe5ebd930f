//! # Core Types
//!
//! Values exchanged between the line reader, the election collaborator and
//! the monitor loop.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one monitor session.
///
/// Generated when a client connects and attached to every log line the
/// session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Leadership state reported by the election collaborator.
///
/// Only [`NodeState::Leader`] and [`NodeState::Follower`] change the monitor's
/// leadership flag. Every other value is a legal notification that the
/// monitor ignores, and new variants may be added.
///
/// # Examples
///
/// ```rust
/// use spy_core::NodeState;
///
/// assert_eq!(NodeState::Leader.leadership(), Some(true));
/// assert_eq!(NodeState::Candidate.leadership(), None);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Another member holds leadership
    Follower,
    /// An election is in progress
    Candidate,
    /// This process holds leadership
    Leader,
    /// The election collaborator is shutting down
    Shutdown,
}

impl NodeState {
    /// The leadership flag value this notification implies, if any.
    pub fn leadership(&self) -> Option<bool> {
        match self {
            NodeState::Leader => Some(true),
            NodeState::Follower => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Follower => write!(f, "Follower"),
            NodeState::Candidate => write!(f, "Candidate"),
            NodeState::Leader => write!(f, "Leader"),
            NodeState::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// One newline-terminated record read from the monitor stream.
///
/// The bytes are kept exactly as received, delimiter included. No protocol
/// interpretation happens beyond line splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedLine(Bytes);

impl ObservedLine {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    /// Raw bytes including the line delimiter.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The record without its trailing `\n` or `\r\n`.
    pub fn trimmed(&self) -> &[u8] {
        let raw = self.0.as_ref();
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        raw.strip_suffix(b"\r").unwrap_or(raw)
    }

    /// Lossy UTF-8 view of the trimmed record.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.trimmed())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Display for ObservedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
