//! # Spy Core
//!
//! Shared building blocks for the redis-spy workspace:
//!
//! - **Error Handling**: [`SpyError`] and the [`Result`] alias used by every crate
//! - **Addresses**: [`NetAddr`] / [`NetAddrList`], the `host:port` endpoints the
//!   monitor dials and the election collaborator binds to
//! - **Session Types**: [`NodeState`] leadership notifications, [`ObservedLine`]
//!   records from the monitor stream, [`SessionId`]
//! - **Configuration**: [`SpyConfig`], built once at startup and passed by
//!   reference into the monitor client and the election collaborator
//!
//! ```rust
//! use spy_core::{NetAddr, SpyConfig};
//!
//! let config = SpyConfig::default().with_redis_addr(NetAddr::new("10.0.0.7", 6380));
//! assert_eq!(config.redis_addr.to_string(), "10.0.0.7:6380");
//! assert!(config.validate().is_ok());
//! ```

pub mod addr;
pub mod config;
pub mod error;
pub mod types;

pub use addr::{NetAddr, NetAddrList};
pub use config::{SpyConfig, MAX_EVENT_BUFFER};
pub use error::*;
pub use types::*;
