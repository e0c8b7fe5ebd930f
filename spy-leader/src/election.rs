//! Leadership election among the configured members.
//!
//! Every probe interval the election checks which peers are alive and picks
//! the live member with the lowest address as leader. Role changes bump the
//! term, are persisted, and are published as [`NodeState`] notifications.

use crate::{probe_peer, LeaderError, LeaderResult, PersistedElection, TermStore};
use spy_core::{NetAddr, NetAddrList, NodeState, SpyConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration for the election collaborator
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Address the liveness listener binds to; also this member's identity
    pub bind_addr: NetAddr,

    /// Directory holding the persisted term
    pub data_dir: PathBuf,

    /// Other members of the election
    pub peers: NetAddrList,

    /// Duration between election rounds
    pub probe_interval: Duration,

    /// Timeout for a single peer probe
    pub probe_timeout: Duration,

    /// Capacity of the notification channel
    pub notification_buffer: usize,
}

impl ElectionConfig {
    pub fn from_spy_config(config: &SpyConfig) -> Self {
        Self {
            bind_addr: config.raft_bind_addr.clone(),
            data_dir: config.raft_data_dir.clone(),
            peers: config.raft_peers.clone(),
            probe_interval: Duration::from_millis(1000),
            probe_timeout: Duration::from_millis(300),
            notification_buffer: 64,
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Current view of leadership
#[derive(Debug, Clone, PartialEq)]
pub struct ElectionState {
    pub role: NodeState,
    pub term: u64,
    /// Winner of the last completed election
    pub leader: Option<NetAddr>,
}

/// Statistics about election rounds
#[derive(Debug, Default, Clone)]
pub struct ElectionStats {
    pub elections_started: u64,
    pub elections_won: u64,
    pub elections_lost: u64,
    pub leadership_changes: u64,
    pub probes_sent: u64,
    pub probe_failures: u64,
    pub notifications_dropped: u64,
}

/// Election collaborator publishing leadership notifications
pub struct Election {
    config: ElectionConfig,
    identity: parking_lot::Mutex<NetAddr>,
    state: Arc<RwLock<ElectionState>>,
    store: TermStore,
    stats: Arc<RwLock<ElectionStats>>,
    notify_tx: mpsc::Sender<NodeState>,
    notify_rx: parking_lot::Mutex<Option<mpsc::Receiver<NodeState>>>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Election {
    /// Create an election from the process configuration
    pub async fn new(config: &SpyConfig) -> LeaderResult<Self> {
        Self::with_config(ElectionConfig::from_spy_config(config)).await
    }

    /// Create an election with explicit tuning
    pub async fn with_config(config: ElectionConfig) -> LeaderResult<Self> {
        if config.notification_buffer == 0 {
            return Err(LeaderError::ConfigError {
                reason: "notification_buffer must be at least 1".to_string(),
            });
        }
        if config.probe_interval.is_zero() {
            return Err(LeaderError::ConfigError {
                reason: "probe_interval must be non-zero".to_string(),
            });
        }

        let store = TermStore::new(&config.data_dir).await?;
        let persisted = store.load().await?.unwrap_or_default();
        info!(
            "Election for {} resuming at term {} with {} peer(s)",
            config.bind_addr,
            persisted.term,
            config.peers.len()
        );

        let (notify_tx, notify_rx) = mpsc::channel(config.notification_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            identity: parking_lot::Mutex::new(config.bind_addr.clone()),
            state: Arc::new(RwLock::new(ElectionState {
                role: NodeState::Follower,
                term: persisted.term,
                leader: None,
            })),
            store,
            stats: Arc::new(RwLock::new(ElectionStats::default())),
            notify_tx,
            notify_rx: parking_lot::Mutex::new(Some(notify_rx)),
            started: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            config,
        })
    }

    /// Hand out the notification channel. Returns `None` after the first call.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<NodeState>> {
        self.notify_rx.lock().take()
    }

    /// Bind the liveness listener and start election rounds
    pub async fn start(self: Arc<Self>) -> LeaderResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LeaderError::AlreadyStarted);
        }

        let listener = match self.bind_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                // nothing was spawned, a later start may retry
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!("Starting election for {}", self.identity());

        tokio::spawn(Self::accept_probes(listener, self.shutdown_rx.clone()));
        tokio::spawn(Arc::clone(&self).run_rounds());

        Ok(())
    }

    /// Stop election rounds; a final `Shutdown` notification is published
    pub async fn stop(&self) -> LeaderResult<()> {
        info!("Stopping election for {}", self.identity());

        if let Err(e) = self.shutdown_tx.send(true) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        let mut state = self.state.write().await;
        if state.role == NodeState::Leader {
            info!("Stepping down from leadership (term {})", state.term);
            self.stats.write().await.leadership_changes += 1;
        }
        state.role = NodeState::Shutdown;
        let persisted = PersistedElection {
            term: state.term,
            role: state.role,
        };
        drop(state);

        self.store.save(&persisted).await
    }

    /// This member's address as seen by its peers
    pub fn identity(&self) -> NetAddr {
        self.identity.lock().clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.role == NodeState::Leader
    }

    pub async fn get_state(&self) -> ElectionState {
        self.state.read().await.clone()
    }

    pub async fn get_stats(&self) -> ElectionStats {
        self.stats.read().await.clone()
    }

    // Private methods

    async fn bind_listener(&self) -> LeaderResult<TcpListener> {
        let bind_failed = |e: std::io::Error| LeaderError::BindFailed {
            addr: self.config.bind_addr.to_string(),
            reason: e.to_string(),
        };

        let listener = TcpListener::bind(self.config.bind_addr.to_string())
            .await
            .map_err(bind_failed)?;

        if self.config.bind_addr.port() == 0 {
            let local = listener.local_addr().map_err(bind_failed)?;
            *self.identity.lock() = NetAddr::new(local.ip().to_string(), local.port());
        }

        Ok(listener)
    }

    async fn accept_probes(listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((_stream, addr)) => debug!("Liveness probe from {}", addr),
                    Err(e) => {
                        error!("Failed to accept probe connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_rounds(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(self.config.probe_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.evaluate().await {
                        error!("Election round failed: {}", e);
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.publish(NodeState::Shutdown).await;
        info!("Election for {} stopped", self.identity());
    }

    async fn evaluate(&self) -> LeaderResult<()> {
        let identity = self.identity();
        let mut live = vec![identity.clone()];

        for peer in &self.config.peers {
            if *peer == identity {
                continue;
            }
            let alive = probe_peer(peer, self.config.probe_timeout).await;
            {
                let mut stats = self.stats.write().await;
                stats.probes_sent += 1;
                if !alive {
                    stats.probe_failures += 1;
                }
            }
            if alive {
                live.push(peer.clone());
            }
        }

        let winner = live
            .into_iter()
            .min()
            .ok_or_else(|| LeaderError::ElectionFailed {
                reason: "no live members".to_string(),
            })?;

        let settled = {
            let state = self.state.read().await;
            match state.role {
                NodeState::Leader => winner == identity,
                NodeState::Follower => state.leader.as_ref() == Some(&winner),
                // stopped elections never run another round
                NodeState::Shutdown => true,
                _ => false,
            }
        };

        if settled {
            return Ok(());
        }

        self.conduct_election(winner, identity).await
    }

    async fn conduct_election(&self, winner: NetAddr, identity: NetAddr) -> LeaderResult<()> {
        let (term, was_leader) = {
            let mut state = self.state.write().await;
            if state.role == NodeState::Shutdown {
                return Ok(());
            }
            let was_leader = state.role == NodeState::Leader;
            state.term += 1;
            state.role = NodeState::Candidate;
            state.leader = None;
            (state.term, was_leader)
        };

        info!("Triggering leadership election for term {}", term);
        self.stats.write().await.elections_started += 1;
        self.publish(NodeState::Candidate).await;

        if winner == identity {
            self.become_leader(identity, term).await
        } else {
            self.become_follower(winner, term, was_leader).await
        }
    }

    async fn become_leader(&self, identity: NetAddr, term: u64) -> LeaderResult<()> {
        info!("Becoming leader for term {}", term);

        {
            let mut state = self.state.write().await;
            if state.role == NodeState::Shutdown {
                debug!("Election stopped during term {}, not taking leadership", term);
                return Ok(());
            }
            state.role = NodeState::Leader;
            state.leader = Some(identity);
        }
        {
            let mut stats = self.stats.write().await;
            stats.elections_won += 1;
            stats.leadership_changes += 1;
        }

        self.store
            .save(&PersistedElection {
                term,
                role: NodeState::Leader,
            })
            .await?;
        self.publish(NodeState::Leader).await;
        Ok(())
    }

    async fn become_follower(&self, leader: NetAddr, term: u64, was_leader: bool) -> LeaderResult<()> {
        debug!("Becoming follower of {} for term {}", leader, term);

        {
            let mut state = self.state.write().await;
            if state.role == NodeState::Shutdown {
                debug!("Election stopped during term {}, not following {}", term, leader);
                return Ok(());
            }
            state.role = NodeState::Follower;
            state.leader = Some(leader);
        }
        {
            let mut stats = self.stats.write().await;
            stats.elections_lost += 1;
            if was_leader {
                stats.leadership_changes += 1;
            }
        }

        self.store
            .save(&PersistedElection {
                term,
                role: NodeState::Follower,
            })
            .await?;
        self.publish(NodeState::Follower).await;
        Ok(())
    }

    async fn publish(&self, state: NodeState) {
        match self.notify_tx.try_send(state) {
            Ok(()) => debug!("Published {}", state),
            Err(TrySendError::Full(_)) => {
                warn!("Notification channel full, dropping {}", state);
                self.stats.write().await.notifications_dropped += 1;
            }
            Err(TrySendError::Closed(_)) => {
                debug!("No notification subscriber, dropping {}", state);
            }
        }
    }
}
