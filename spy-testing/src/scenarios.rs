//! Scripted leadership sources and observers for session tests.

use spy_core::{NodeState, ObservedLine, SpyError};
use spy_monitor::MonitorObserver;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// One event as seen by the monitor loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Line(String),
    Leadership { state: NodeState, is_leader: bool },
    Terminated(String),
}

/// Observer that records everything it is handed, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<Observed>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Observed::Line(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn terminations(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, Observed::Terminated(_)))
            .count()
    }
}

impl MonitorObserver for RecordingObserver {
    fn on_line(&mut self, line: &ObservedLine) {
        self.events.push(Observed::Line(line.text().into_owned()));
    }

    fn on_leadership(&mut self, state: NodeState, is_leader: bool) {
        self.events.push(Observed::Leadership { state, is_leader });
    }

    fn on_terminated(&mut self, reason: &SpyError) {
        self.events.push(Observed::Terminated(reason.to_string()));
    }
}

/// Test-side producer of leadership notifications.
#[derive(Debug, Clone)]
pub struct LeadershipFeed {
    tx: mpsc::Sender<NodeState>,
}

impl LeadershipFeed {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NodeState>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue notifications without waiting for the loop.
    ///
    /// Returns how many fit into the channel.
    pub fn preload(&self, states: &[NodeState]) -> usize {
        states
            .iter()
            .take_while(|state| self.tx.try_send(**state).is_ok())
            .count()
    }

    pub async fn send(&self, state: NodeState) -> bool {
        self.tx.send(state).await.is_ok()
    }

    /// Send each state after its delay, in order.
    pub fn play(&self, script: Vec<(Duration, NodeState)>) -> JoinHandle<usize> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut sent = 0;
            for (delay, state) in script {
                sleep(delay).await;
                if tx.send(state).await.is_err() {
                    debug!("Leadership receiver gone after {} notification(s)", sent);
                    break;
                }
                sent += 1;
            }
            sent
        })
    }
}

/// Install a WARN-level subscriber once per test binary.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}
