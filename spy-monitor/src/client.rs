//! Session client: owns the connection, the two session channels and the
//! leadership flag, and drives one monitor session from connect to teardown.

use crate::connection::{subscribe_frame, StreamConnection};
use crate::monitor::{MonitorChannels, MonitorLoop, MonitorObserver, SessionReport, TracingObserver};
use crate::reader::{LineReader, ReaderSummary};
use spy_core::{
    NetAddr, NodeState, ObservedLine, Result, SessionId, SpyConfig, SpyError, MAX_EVENT_BUFFER,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the error channel. A session carries at most one
/// termination, the slot is there so the sender never waits on the loop.
const ERROR_CHANNEL_CAPACITY: usize = 1;

/// Channels created by a successful connect.
struct SessionChannels {
    /// Moved into the line reader when it starts
    event_tx: Option<mpsc::Sender<ObservedLine>>,
    event_rx: mpsc::Receiver<ObservedLine>,
    error_tx: mpsc::Sender<SpyError>,
    error_rx: mpsc::Receiver<SpyError>,
}

/// Handle for ending a running session from outside the monitor loop.
#[derive(Debug, Clone)]
pub struct Terminator {
    session: SessionId,
    error_tx: mpsc::Sender<SpyError>,
}

impl Terminator {
    /// Inject a termination. Returns `false` when the session is already
    /// terminating or gone.
    pub fn terminate(&self, reason: impl Into<String>) -> bool {
        match self.error_tx.try_send(SpyError::terminated(reason)) {
            Ok(()) => {
                info!("Session {}: termination requested", self.session);
                true
            }
            Err(e) => {
                debug!(
                    "Session {}: termination not injected: {}",
                    self.session, e
                );
                false
            }
        }
    }
}

/// Client for one monitor session against a redis instance.
///
/// The connection handle is held from a successful [`connect`](Self::connect)
/// until [`teardown`](Self::teardown). A client that was torn down refuses
/// to connect again.
pub struct MonitorClient {
    session: SessionId,
    connect_timeout: Duration,
    event_buffer: usize,
    connection: Option<StreamConnection>,
    is_leader: bool,
    channels: Option<SessionChannels>,
    reader: Option<JoinHandle<ReaderSummary>>,
    closed: bool,
}

impl MonitorClient {
    pub fn new(config: &SpyConfig) -> Self {
        Self {
            session: SessionId::new(),
            connect_timeout: config.connect_timeout,
            event_buffer: config.event_buffer.clamp(1, MAX_EVENT_BUFFER),
            connection: None,
            is_leader: false,
            channels: None,
            reader: None,
            closed: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn peer(&self) -> Option<&NetAddr> {
        self.connection.as_ref().map(StreamConnection::peer)
    }

    /// Open the connection and create the session channels.
    ///
    /// On failure nothing is created and nothing is spawned.
    pub async fn connect(&mut self, addr: &NetAddr) -> Result<()> {
        if self.closed {
            return Err(SpyError::SessionClosed);
        }
        if let Some(connection) = &self.connection {
            return Err(SpyError::AlreadyConnected {
                addr: connection.peer().to_string(),
            });
        }

        let connection = match StreamConnection::open(addr, self.connect_timeout).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Session {}: {}", self.session, e);
                return Err(e);
            }
        };

        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        self.connection = Some(connection);
        self.channels = Some(SessionChannels {
            event_tx: Some(event_tx),
            event_rx,
            error_tx,
            error_rx,
        });
        self.is_leader = false;

        info!("Session {}: connected to {}", self.session, addr);
        Ok(())
    }

    /// Write `monitor\r\n` to the connection.
    ///
    /// Skipped when not connected. A failed write is logged and otherwise
    /// ignored, no acknowledgement is awaited.
    pub async fn send_subscribe_request(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            debug!(
                "Session {}: not connected, skipping subscribe request",
                self.session
            );
            return;
        };

        match connection.write_frame(&subscribe_frame()).await {
            Ok(()) => debug!("Session {}: subscribe request sent", self.session),
            Err(e) => warn!("Session {}: {}", self.session, e),
        }
    }

    /// Spawn the session's line reader.
    pub fn start_reader(&mut self) -> Result<()> {
        let channels = self.channels.as_mut().ok_or(SpyError::NotConnected)?;
        let event_tx = channels
            .event_tx
            .take()
            .ok_or(SpyError::ReaderAlreadyStarted)?;
        let source = self
            .connection
            .as_mut()
            .and_then(StreamConnection::take_reader);

        let reader = LineReader::new(self.session, source, event_tx, channels.error_tx.clone());
        self.reader = Some(reader.spawn());
        debug!("Session {}: line reader spawned", self.session);
        Ok(())
    }

    /// A handle that can end the session, `None` when not connected.
    pub fn terminator(&self) -> Option<Terminator> {
        self.channels.as_ref().map(|channels| Terminator {
            session: self.session,
            error_tx: channels.error_tx.clone(),
        })
    }

    /// Run the monitor loop until the session terminates.
    ///
    /// Without a started reader this only returns on an injected
    /// termination.
    pub async fn monitor<O: MonitorObserver>(
        &mut self,
        leadership: &mut mpsc::Receiver<NodeState>,
        observer: &mut O,
    ) -> Result<SessionReport> {
        let channels = self.channels.as_mut().ok_or(SpyError::NotConnected)?;

        let report = MonitorLoop::new(self.session, &mut self.is_leader)
            .run(
                MonitorChannels {
                    events: &mut channels.event_rx,
                    errors: &mut channels.error_rx,
                    leadership,
                },
                observer,
            )
            .await;

        Ok(report)
    }

    /// Start the reader if needed, monitor with the logging observer, then
    /// tear down.
    pub async fn run(&mut self, leadership: &mut mpsc::Receiver<NodeState>) -> Result<SessionReport> {
        let mut observer = TracingObserver::new(self.session);
        self.run_with(leadership, &mut observer).await
    }

    pub async fn run_with<O: MonitorObserver>(
        &mut self,
        leadership: &mut mpsc::Receiver<NodeState>,
        observer: &mut O,
    ) -> Result<SessionReport> {
        if self.reader.is_none() {
            self.start_reader()?;
        }
        let result = self.monitor(leadership, observer).await;
        self.teardown().await;
        result
    }

    /// Close the connection, then both session channels.
    ///
    /// Returns `false` when there was nothing to tear down: the client never
    /// connected, or it was already torn down.
    pub async fn teardown(&mut self) -> bool {
        if self.closed {
            debug!("Session {}: already torn down", self.session);
            return false;
        }
        let Some(connection) = self.connection.take() else {
            debug!("Session {}: no connection to tear down", self.session);
            return false;
        };
        self.closed = true;

        if let Err(e) = connection.close().await {
            warn!("Session {}: error closing connection: {}", self.session, e);
        }

        if let Some(reader) = self.reader.take() {
            if reader.is_finished() {
                match reader.await {
                    Ok(summary) => debug!(
                        "Session {}: reader published {} line(s), {} byte(s)",
                        self.session, summary.lines_published, summary.bytes_read
                    ),
                    Err(e) => warn!("Session {}: reader task failed: {}", self.session, e),
                }
            } else {
                reader.abort();
            }
        }

        if let Some(mut channels) = self.channels.take() {
            channels.event_rx.close();
            channels.error_rx.close();
        }

        info!("Session {}: torn down", self.session);
        true
    }
}

/// One complete session: connect to `config.redis_addr`, subscribe, monitor
/// until termination, tear down.
pub async fn run_session(
    config: &SpyConfig,
    leadership: &mut mpsc::Receiver<NodeState>,
) -> Result<SessionReport> {
    let mut client = MonitorClient::new(config);
    client.connect(&config.redis_addr).await?;
    client.send_subscribe_request().await;
    client.run(leadership).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout};

    async fn local_listener() -> (TcpListener, NetAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = NetAddr::new("127.0.0.1", listener.local_addr().unwrap().port());
        (listener, addr)
    }

    /// Close with SO_LINGER 0 so the peer sees a reset instead of a FIN.
    #[allow(deprecated)]
    fn reset(stream: TcpStream) {
        stream.set_linger(Some(Duration::ZERO)).unwrap();
        drop(stream);
    }

    #[tokio::test]
    async fn test_subscribe_without_connection_is_noop() {
        let mut client = MonitorClient::new(&SpyConfig::default());
        client.send_subscribe_request().await;

        assert!(!client.is_connected());
        assert!(!client.is_leader());
    }

    #[tokio::test]
    async fn test_unconnected_client() {
        let mut client = MonitorClient::new(&SpyConfig::default());
        let (_tx, mut leadership) = mpsc::channel(1);

        assert!(client.terminator().is_none());
        assert!(matches!(client.start_reader(), Err(SpyError::NotConnected)));
        assert!(matches!(
            client.monitor(&mut leadership, &mut crate::NullObserver).await,
            Err(SpyError::NotConnected)
        ));
        assert!(!client.teardown().await);
    }

    #[tokio::test]
    async fn test_injected_termination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = NetAddr::new("127.0.0.1", listener.local_addr().unwrap().port());
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut client = MonitorClient::new(&SpyConfig::default());
        client.connect(&addr).await.unwrap();
        assert!(matches!(
            client.connect(&addr).await,
            Err(SpyError::AlreadyConnected { .. })
        ));
        client.send_subscribe_request().await;
        client.start_reader().unwrap();
        assert!(matches!(
            client.start_reader(),
            Err(SpyError::ReaderAlreadyStarted)
        ));

        let terminator = client.terminator().unwrap();
        assert!(terminator.terminate("test"));

        let (_tx, mut leadership) = mpsc::channel(1);
        let report = client.run(&mut leadership).await.unwrap();

        assert!(matches!(report.termination, SpyError::Terminated { .. }));
        assert!(!client.is_connected());
        assert!(!client.teardown().await);
        assert!(!terminator.terminate("again"));
        assert_eq!(server.await.unwrap(), b"monitor\r\n");
    }

    #[tokio::test]
    async fn test_oversized_event_buffer_is_clamped() {
        let (listener, addr) = local_listener().await;
        let config = SpyConfig::default().with_event_buffer(usize::MAX);
        assert!(config.validate().is_err());

        let mut client = MonitorClient::new(&config);
        client.connect(&addr).await.unwrap();
        let (_stream, _) = listener.accept().await.unwrap();

        assert!(client.is_connected());
        assert!(client.teardown().await);
    }

    #[tokio::test]
    async fn test_failed_subscribe_write_is_not_escalated() {
        let (listener, addr) = local_listener().await;
        let mut client = MonitorClient::new(&SpyConfig::default());
        client.connect(&addr).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        reset(stream);
        sleep(Duration::from_millis(50)).await;

        client.send_subscribe_request().await;
        client.send_subscribe_request().await;
        assert!(client.is_connected());
        assert!(!client.is_leader());

        let (_tx, mut leadership) = mpsc::channel(1);
        let report = timeout(Duration::from_secs(5), client.run(&mut leadership))
            .await
            .expect("session did not terminate")
            .unwrap();

        assert!(
            matches!(
                report.termination,
                SpyError::StreamRead { .. } | SpyError::StreamEnded
            ),
            "unexpected termination {:?}",
            report.termination
        );
        assert!(!report.is_leader);
        assert_eq!(report.lines_observed, 0);
    }
}
