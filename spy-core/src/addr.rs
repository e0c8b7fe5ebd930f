//! `host:port` endpoints.
//!
//! [`NetAddr`] is what the monitor dials and what the election collaborator
//! binds to; [`NetAddrList`] is the comma-separated peer list.

use crate::{Result, SpyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A host and port pair, formatted as `host:port` (`[v6]:port` for IPv6).
///
/// # Examples
///
/// ```rust
/// use spy_core::NetAddr;
///
/// let addr: NetAddr = "[::1]:6379".parse().unwrap();
/// assert_eq!(addr.host(), "::1");
/// assert_eq!(addr.to_string(), "[::1]:6379");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetAddr {
    host: String,
    port: u16,
}

impl NetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NetAddr {
    type Err = SpyError;

    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| SpyError::invalid_address(input, "expected host:port"))?;

        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| SpyError::invalid_address(input, "unterminated '['"))?,
            None if host.contains(':') => {
                return Err(SpyError::invalid_address(
                    input,
                    "IPv6 hosts must be bracketed",
                ))
            }
            None => host,
        };

        if host.is_empty() {
            return Err(SpyError::invalid_address(input, "empty host"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| SpyError::invalid_address(input, format!("bad port: {}", e)))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for NetAddr {
    type Error = SpyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NetAddr> for String {
    fn from(addr: NetAddr) -> Self {
        addr.to_string()
    }
}

/// Comma-separated list of peer addresses.
///
/// An empty string parses to an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetAddrList(Vec<NetAddr>);

impl NetAddrList {
    pub fn new(addrs: Vec<NetAddr>) -> Self {
        Self(addrs)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NetAddr> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, addr: &NetAddr) -> bool {
        self.0.contains(addr)
    }

    pub fn push(&mut self, addr: NetAddr) {
        self.0.push(addr);
    }
}

impl fmt::Display for NetAddrList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", addr)?;
        }
        Ok(())
    }
}

impl FromStr for NetAddrList {
    type Err = SpyError;

    fn from_str(input: &str) -> Result<Self> {
        input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(NetAddr::from_str)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl<'a> IntoIterator for &'a NetAddrList {
    type Item = &'a NetAddr;
    type IntoIter = std::slice::Iter<'a, NetAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<NetAddr> for NetAddrList {
    fn from_iter<T: IntoIterator<Item = NetAddr>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr: NetAddr = "127.0.0.1:6379".parse().unwrap();
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), 6379);
        assert_eq!(addr.to_string(), "127.0.0.1:6379");

        let named: NetAddr = " redis.internal:7000 ".parse().unwrap();
        assert_eq!(named, NetAddr::new("redis.internal", 7000));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("6379".parse::<NetAddr>().is_err());
        assert!(":6379".parse::<NetAddr>().is_err());
        assert!("localhost:redis".parse::<NetAddr>().is_err());
        assert!("localhost:70000".parse::<NetAddr>().is_err());
        assert!("::1:6379".parse::<NetAddr>().is_err());
        assert!("[::1:6379".parse::<NetAddr>().is_err());
    }

    #[test]
    fn test_ipv6_display() {
        let addr = NetAddr::new("fe80::1", 1000);
        assert_eq!(addr.to_string(), "[fe80::1]:1000");
        assert_eq!(addr.to_string().parse::<NetAddr>().unwrap(), addr);
    }

    #[test]
    fn test_peer_list() {
        let peers: NetAddrList = "10.0.0.1:1000, 10.0.0.2:1000,,".parse().unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&NetAddr::new("10.0.0.2", 1000)));
        assert_eq!(peers.to_string(), "10.0.0.1:1000,10.0.0.2:1000");

        let empty: NetAddrList = "".parse().unwrap();
        assert!(empty.is_empty());

        assert!("10.0.0.1:1000,bogus".parse::<NetAddrList>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let addr = NetAddr::new("127.0.0.1", 6379);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"127.0.0.1:6379\"");

        let peers: NetAddrList = serde_json::from_str("[\"a:1\",\"b:2\"]").unwrap();
        assert_eq!(peers.to_string(), "a:1,b:2");
    }
}
