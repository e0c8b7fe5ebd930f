//! # Spy Monitor
//!
//! The session core of redis-spy: a connection to one redis instance, a
//! background task splitting its `MONITOR` stream into lines, and a control
//! loop merging those lines with leadership notifications.
//!
//! ## Components
//!
//! - [`StreamConnection`]: TCP connection, subscribe request, shutdown
//! - [`LineReader`]: background task publishing [`ObservedLine`]s and
//!   exactly one terminal [`SpyError`]
//! - [`MonitorLoop`]: biased wait over termination, leadership and lines
//! - [`MonitorClient`]: owns the session state and runs connect, subscribe,
//!   monitor and teardown in order
//!
//! ## Example
//!
//! ```rust,no_run
//! use spy_core::{NodeState, SpyConfig};
//! use spy_monitor::run_session;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> spy_core::Result<()> {
//! let config = SpyConfig::default();
//! let (leader_tx, mut leadership) = mpsc::channel(16);
//! leader_tx.send(NodeState::Leader).await.ok();
//!
//! let report = run_session(&config, &mut leadership).await?;
//! println!("observed {} commands", report.lines_observed);
//! # Ok(())
//! # }
//! ```
//!
//! [`ObservedLine`]: spy_core::ObservedLine
//! [`SpyError`]: spy_core::SpyError

pub mod client;
pub mod connection;
pub mod monitor;
pub mod reader;

pub use client::{run_session, MonitorClient, Terminator};
pub use connection::{subscribe_frame, StreamConnection, StreamSource, SUBSCRIBE_COMMAND};
pub use monitor::{
    LoopState, MonitorChannels, MonitorLoop, MonitorObserver, NullObserver, SessionReport,
    TracingObserver,
};
pub use reader::{LineReader, ReaderSummary};
