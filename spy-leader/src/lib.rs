//! # Spy Leader
//!
//! Election collaborator for redis-spy.
//!
//! The monitor core treats leadership as an opaque notification source: all
//! it consumes is a channel of [`NodeState`](spy_core::NodeState) values.
//! This crate provides that source:
//!
//! - Liveness listener on the configured bind address
//! - Periodic probing of the configured peers
//! - Deterministic winner selection among live members
//! - Term persistence in the data directory
//! - Leadership notifications on every role change
//!
//! It is a stand-in for a real consensus module, not a consensus protocol:
//! there is no log replication and no quorum.

pub mod election;
pub mod errors;
pub mod probe;
pub mod store;

pub use election::{Election, ElectionConfig, ElectionState, ElectionStats};
pub use errors::{LeaderError, LeaderResult};
pub use probe::probe_peer;
pub use store::{PersistedElection, TermStore};
