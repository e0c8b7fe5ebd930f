//! The monitor loop: the single point where observed lines, leadership
//! notifications and the termination signal meet.
//!
//! # Ordering
//!
//! Within one channel events are handled in the order they were sent. Across
//! channels the wait is `biased`, with a fixed priority:
//!
//! 1. termination, so a pending failure ends the session before any other
//!    queued event is looked at
//! 2. leadership notifications, so the flag is current before the next line
//! 3. observed lines
//!
//! The line reader flushes its lines before it publishes a termination, so
//! the priority never reorders a reader's own output.

use spy_core::{NodeState, ObservedLine, SessionId, SpyError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Receives every event the monitor loop handles, in handling order.
pub trait MonitorObserver {
    fn on_line(&mut self, _line: &ObservedLine) {}

    /// Called for every notification, applied or ignored, with the flag
    /// value after handling it.
    fn on_leadership(&mut self, _state: NodeState, _is_leader: bool) {}

    fn on_terminated(&mut self, _reason: &SpyError) {}
}

/// Default observer: logs each event.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    session: SessionId,
}

impl TracingObserver {
    pub fn new(session: SessionId) -> Self {
        Self { session }
    }
}

impl MonitorObserver for TracingObserver {
    fn on_line(&mut self, line: &ObservedLine) {
        info!("Session {}: command: {}", self.session, line);
    }

    fn on_leadership(&mut self, state: NodeState, is_leader: bool) {
        info!(
            "Session {}: node state {} (leader: {})",
            self.session, state, is_leader
        );
    }

    fn on_terminated(&mut self, reason: &SpyError) {
        error!("Session {}: monitor terminated: {}", self.session, reason);
    }
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl MonitorObserver for NullObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminated,
}

/// Outcome of one monitor session
#[derive(Debug)]
pub struct SessionReport {
    pub session: SessionId,
    /// Leadership flag when the loop exited
    pub is_leader: bool,
    pub lines_observed: u64,
    /// `Leader`/`Follower` notifications
    pub leadership_applied: u64,
    /// Any other notification value
    pub leadership_ignored: u64,
    /// The failure that ended the session
    pub termination: SpyError,
}

/// The three event sources of a session.
pub struct MonitorChannels<'a> {
    pub events: &'a mut mpsc::Receiver<ObservedLine>,
    pub errors: &'a mut mpsc::Receiver<SpyError>,
    pub leadership: &'a mut mpsc::Receiver<NodeState>,
}

enum Wakeup {
    Failure(Option<SpyError>),
    Leadership(Option<NodeState>),
    Line(Option<ObservedLine>),
}

/// Control loop of one session.
///
/// Holds the only mutable borrow of the client's leadership flag for as long
/// as it runs.
pub struct MonitorLoop<'a> {
    session: SessionId,
    is_leader: &'a mut bool,
    state: LoopState,
    leadership_open: bool,
    lines_observed: u64,
    leadership_applied: u64,
    leadership_ignored: u64,
}

impl<'a> MonitorLoop<'a> {
    pub fn new(session: SessionId, is_leader: &'a mut bool) -> Self {
        Self {
            session,
            is_leader,
            state: LoopState::Running,
            leadership_open: true,
            lines_observed: 0,
            leadership_applied: 0,
            leadership_ignored: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_leader(&self) -> bool {
        *self.is_leader
    }

    /// Run until a termination arrives. Blocks indefinitely otherwise.
    pub async fn run<O: MonitorObserver>(
        &mut self,
        channels: MonitorChannels<'_>,
        observer: &mut O,
    ) -> SessionReport {
        debug!("Session {}: monitor loop running", self.session);

        let termination = loop {
            let wakeup = tokio::select! {
                biased;
                failure = channels.errors.recv() => Wakeup::Failure(failure),
                state = channels.leadership.recv(), if self.leadership_open => Wakeup::Leadership(state),
                line = channels.events.recv() => Wakeup::Line(line),
            };

            if let Some(reason) = self.handle(wakeup, observer) {
                break reason;
            }
        };

        self.state = LoopState::Terminated;
        observer.on_terminated(&termination);
        info!(
            "Session {}: monitor loop terminated after {} line(s): {}",
            self.session, self.lines_observed, termination
        );

        SessionReport {
            session: self.session,
            is_leader: *self.is_leader,
            lines_observed: self.lines_observed,
            leadership_applied: self.leadership_applied,
            leadership_ignored: self.leadership_ignored,
            termination,
        }
    }

    /// Handle one wakeup; `Some` means the loop must stop.
    fn handle<O: MonitorObserver>(&mut self, wakeup: Wakeup, observer: &mut O) -> Option<SpyError> {
        match wakeup {
            Wakeup::Failure(Some(reason)) => Some(reason),
            // every sender is gone, nothing can end the session any more
            Wakeup::Failure(None) => Some(SpyError::StreamEnded),
            Wakeup::Leadership(Some(state)) => {
                self.apply_leadership(state, observer);
                None
            }
            Wakeup::Leadership(None) => {
                warn!(
                    "Session {}: leadership channel closed, continuing without it",
                    self.session
                );
                self.leadership_open = false;
                None
            }
            Wakeup::Line(Some(line)) => {
                self.lines_observed += 1;
                observer.on_line(&line);
                None
            }
            // the reader always publishes a termination before it drops the
            // event sender, and terminations are polled first
            Wakeup::Line(None) => Some(SpyError::stream_read(
                "line reader stopped without a termination signal",
            )),
        }
    }

    fn apply_leadership<O: MonitorObserver>(&mut self, state: NodeState, observer: &mut O) {
        match state.leadership() {
            Some(is_leader) => {
                if *self.is_leader != is_leader {
                    info!(
                        "Session {}: leadership changed to {}",
                        self.session, is_leader
                    );
                }
                *self.is_leader = is_leader;
                self.leadership_applied += 1;
            }
            None => {
                debug!("Session {}: ignoring node state {}", self.session, state);
                self.leadership_ignored += 1;
            }
        }
        observer.on_leadership(state, *self.is_leader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[derive(Debug, PartialEq)]
    enum Seen {
        Line(String),
        Leadership(NodeState, bool),
        Terminated,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Seen>,
    }

    impl MonitorObserver for Recorder {
        fn on_line(&mut self, line: &ObservedLine) {
            self.seen.push(Seen::Line(line.text().into_owned()));
        }

        fn on_leadership(&mut self, state: NodeState, is_leader: bool) {
            self.seen.push(Seen::Leadership(state, is_leader));
        }

        fn on_terminated(&mut self, _reason: &SpyError) {
            self.seen.push(Seen::Terminated);
        }
    }

    struct Sources {
        event_tx: mpsc::Sender<ObservedLine>,
        event_rx: mpsc::Receiver<ObservedLine>,
        error_tx: mpsc::Sender<SpyError>,
        error_rx: mpsc::Receiver<SpyError>,
        leader_tx: mpsc::Sender<NodeState>,
        leader_rx: mpsc::Receiver<NodeState>,
    }

    impl Sources {
        fn new() -> Self {
            let (event_tx, event_rx) = mpsc::channel(16);
            let (error_tx, error_rx) = mpsc::channel(1);
            let (leader_tx, leader_rx) = mpsc::channel(16);
            Self {
                event_tx,
                event_rx,
                error_tx,
                error_rx,
                leader_tx,
                leader_rx,
            }
        }
    }

    fn line(text: &str) -> ObservedLine {
        ObservedLine::new(format!("{}\r\n", text))
    }

    #[tokio::test]
    async fn test_flag_follows_last_decisive_notification() {
        let Sources {
            event_tx: _event_tx,
            mut event_rx,
            error_tx,
            mut error_rx,
            leader_tx,
            mut leader_rx,
        } = Sources::new();
        let mut is_leader = false;
        let mut recorder = Recorder::default();

        let driver = async {
            for state in [
                NodeState::Follower,
                NodeState::Leader,
                NodeState::Candidate,
                NodeState::Follower,
            ] {
                leader_tx.send(state).await.unwrap();
            }
            sleep(Duration::from_millis(50)).await;
            error_tx.send(SpyError::StreamEnded).await.unwrap();
        };
        let mut monitor_loop = MonitorLoop::new(SessionId::new(), &mut is_leader);
        let monitor = monitor_loop.run(
            MonitorChannels {
                events: &mut event_rx,
                errors: &mut error_rx,
                leadership: &mut leader_rx,
            },
            &mut recorder,
        );

        let (_, report) = tokio::join!(driver, monitor);

        assert!(!report.is_leader);
        assert_eq!(report.leadership_applied, 3);
        assert_eq!(report.leadership_ignored, 1);
        assert!(matches!(report.termination, SpyError::StreamEnded));
        assert_eq!(
            recorder.seen,
            vec![
                Seen::Leadership(NodeState::Follower, false),
                Seen::Leadership(NodeState::Leader, true),
                Seen::Leadership(NodeState::Candidate, true),
                Seen::Leadership(NodeState::Follower, false),
                Seen::Terminated,
            ]
        );
        assert!(!is_leader);
    }

    #[tokio::test]
    async fn test_termination_preempts_pending_events() {
        let mut sources = Sources::new();
        for text in ["a", "b", "c"] {
            sources.event_tx.send(line(text)).await.unwrap();
        }
        sources.leader_tx.send(NodeState::Leader).await.unwrap();
        sources
            .error_tx
            .send(SpyError::terminated("shutdown"))
            .await
            .unwrap();

        let mut is_leader = false;
        let mut recorder = Recorder::default();
        let report = MonitorLoop::new(SessionId::new(), &mut is_leader)
            .run(
                MonitorChannels {
                    events: &mut sources.event_rx,
                    errors: &mut sources.error_rx,
                    leadership: &mut sources.leader_rx,
                },
                &mut recorder,
            )
            .await;

        assert!(matches!(report.termination, SpyError::Terminated { .. }));
        assert_eq!(report.lines_observed, 0);
        assert_eq!(report.leadership_applied, 0);
        assert!(!report.is_leader);
        assert_eq!(recorder.seen, vec![Seen::Terminated]);

        // nothing was consumed from the other sources
        assert_eq!(sources.event_rx.try_recv().unwrap(), line("a"));
        assert_eq!(sources.leader_rx.try_recv().unwrap(), NodeState::Leader);
    }

    #[tokio::test]
    async fn test_lines_are_informational() {
        let Sources {
            event_tx,
            mut event_rx,
            error_tx,
            mut error_rx,
            leader_tx: _leader_tx,
            mut leader_rx,
        } = Sources::new();
        let mut is_leader = true;
        let mut recorder = Recorder::default();

        let driver = async {
            event_tx.send(line("\"SET\" \"k\" \"v\"")).await.unwrap();
            event_tx.send(line("\"GET\" \"k\"")).await.unwrap();
            sleep(Duration::from_millis(50)).await;
            error_tx.send(SpyError::StreamEnded).await.unwrap();
        };
        let mut monitor_loop = MonitorLoop::new(SessionId::new(), &mut is_leader);
        let monitor = monitor_loop.run(
            MonitorChannels {
                events: &mut event_rx,
                errors: &mut error_rx,
                leadership: &mut leader_rx,
            },
            &mut recorder,
        );
        let (_, report) = tokio::join!(driver, monitor);

        assert_eq!(report.lines_observed, 2);
        assert!(report.is_leader);
        assert_eq!(
            recorder.seen,
            vec![
                Seen::Line("\"SET\" \"k\" \"v\"".to_string()),
                Seen::Line("\"GET\" \"k\"".to_string()),
                Seen::Terminated,
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_error_channel_ends_session() {
        let mut sources = Sources::new();
        drop(sources.error_tx);

        let mut is_leader = false;
        let report = timeout(
            Duration::from_secs(5),
            MonitorLoop::new(SessionId::new(), &mut is_leader).run(
                MonitorChannels {
                    events: &mut sources.event_rx,
                    errors: &mut sources.error_rx,
                    leadership: &mut sources.leader_rx,
                },
                &mut NullObserver,
            ),
        )
        .await
        .unwrap();

        assert!(matches!(report.termination, SpyError::StreamEnded));
    }

    #[tokio::test]
    async fn test_reader_vanishing_ends_session() {
        let mut sources = Sources::new();
        drop(sources.event_tx);

        let mut is_leader = false;
        let report = timeout(
            Duration::from_secs(5),
            MonitorLoop::new(SessionId::new(), &mut is_leader).run(
                MonitorChannels {
                    events: &mut sources.event_rx,
                    errors: &mut sources.error_rx,
                    leadership: &mut sources.leader_rx,
                },
                &mut NullObserver,
            ),
        )
        .await
        .unwrap();

        assert!(matches!(report.termination, SpyError::StreamRead { .. }));
    }

    #[tokio::test]
    async fn test_closed_leadership_channel_is_tolerated() {
        let Sources {
            event_tx,
            mut event_rx,
            error_tx,
            mut error_rx,
            leader_tx,
            mut leader_rx,
        } = Sources::new();
        leader_tx.send(NodeState::Leader).await.unwrap();
        drop(leader_tx);

        let mut is_leader = false;
        let mut recorder = Recorder::default();
        let driver = async {
            sleep(Duration::from_millis(20)).await;
            event_tx.send(line("PING")).await.unwrap();
            sleep(Duration::from_millis(20)).await;
            error_tx.send(SpyError::StreamEnded).await.unwrap();
        };
        let mut monitor_loop = MonitorLoop::new(SessionId::new(), &mut is_leader);
        let monitor = monitor_loop.run(
            MonitorChannels {
                events: &mut event_rx,
                errors: &mut error_rx,
                leadership: &mut leader_rx,
            },
            &mut recorder,
        );
        let (_, report) = tokio::join!(driver, monitor);

        assert!(report.is_leader);
        assert_eq!(report.lines_observed, 1);
        assert_eq!(
            recorder.seen,
            vec![
                Seen::Leadership(NodeState::Leader, true),
                Seen::Line("PING".to_string()),
                Seen::Terminated,
            ]
        );
    }

    fn node_state(code: u8) -> NodeState {
        match code {
            0 => NodeState::Follower,
            1 => NodeState::Candidate,
            2 => NodeState::Leader,
            _ => NodeState::Shutdown,
        }
    }

    proptest! {
        #[test]
        fn prop_flag_equals_last_leader_or_follower(
            initial in any::<bool>(),
            codes in prop::collection::vec(0u8..4, 0..64),
        ) {
            let states: Vec<NodeState> = codes.into_iter().map(node_state).collect();
            let expected = states
                .iter()
                .rev()
                .find_map(|state| state.leadership())
                .unwrap_or(initial);

            let mut is_leader = initial;
            let mut monitor = MonitorLoop::new(SessionId::new(), &mut is_leader);
            for state in &states {
                monitor.apply_leadership(*state, &mut NullObserver);
            }
            prop_assert_eq!(monitor.is_leader(), expected);
            prop_assert_eq!(monitor.state(), LoopState::Running);
            drop(monitor);
            prop_assert_eq!(is_leader, expected);
        }
    }
}
