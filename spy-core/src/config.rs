use crate::{NetAddr, NetAddrList, Result, SpyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted event channel capacity.
pub const MAX_EVENT_BUFFER: usize = 1 << 20;

/// Process-wide settings, constructed once at startup.
///
/// The monitor client reads the redis address, dial timeout and channel
/// sizing; the election collaborator reads the raft bind address, data
/// directory and peers. Missing JSON fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpyConfig {
    /// Address of the redis instance to observe
    pub redis_addr: NetAddr,
    /// Address the election collaborator listens on
    pub raft_bind_addr: NetAddr,
    /// Directory for election state
    pub raft_data_dir: PathBuf,
    /// Other election members
    pub raft_peers: NetAddrList,
    /// Upper bound on dialing the redis instance
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Capacity of the event channel between line reader and monitor loop
    pub event_buffer: usize,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            redis_addr: NetAddr::new("127.0.0.1", 6379),
            raft_bind_addr: NetAddr::new("127.0.0.1", 1000),
            raft_data_dir: PathBuf::from("/tmp/raft_data"),
            raft_peers: NetAddrList::default(),
            connect_timeout: Duration::from_secs(10),
            event_buffer: 1024,
        }
    }
}

impl SpyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SpyError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_redis_addr(mut self, addr: NetAddr) -> Self {
        self.redis_addr = addr;
        self
    }

    pub fn with_raft_bind_addr(mut self, addr: NetAddr) -> Self {
        self.raft_bind_addr = addr;
        self
    }

    pub fn with_raft_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raft_data_dir = dir.into();
        self
    }

    pub fn with_raft_peers(mut self, peers: NetAddrList) -> Self {
        self.raft_peers = peers;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(SpyError::config("event_buffer must be at least 1"));
        }
        if self.event_buffer > MAX_EVENT_BUFFER {
            return Err(SpyError::config(format!(
                "event_buffer must be at most {}",
                MAX_EVENT_BUFFER
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(SpyError::config("connect_timeout must be non-zero"));
        }
        if self.raft_data_dir.as_os_str().is_empty() {
            return Err(SpyError::config("raft_data_dir must not be empty"));
        }
        let mut seen = Vec::with_capacity(self.raft_peers.len());
        for peer in &self.raft_peers {
            if seen.contains(&peer) {
                return Err(SpyError::config(format!("duplicate raft peer {}", peer)));
            }
            seen.push(peer);
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
