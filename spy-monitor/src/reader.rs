//! Background task turning the monitor byte stream into line events.

use bytes::Bytes;
use spy_core::{ObservedLine, SessionId, SpyError};
use std::io::ErrorKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a finished line reader did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSummary {
    pub lines_published: u64,
    pub bytes_read: u64,
}

/// Reads newline-terminated records and publishes them on the event channel.
///
/// Every exit path except a vanished monitor loop publishes exactly one
/// terminal [`SpyError`] on the error channel, and nothing is published
/// after it.
pub struct LineReader<R> {
    session: SessionId,
    source: Option<R>,
    event_tx: mpsc::Sender<ObservedLine>,
    error_tx: mpsc::Sender<SpyError>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// `source` is `None` when there is no connection to read from.
    pub fn new(
        session: SessionId,
        source: Option<R>,
        event_tx: mpsc::Sender<ObservedLine>,
        error_tx: mpsc::Sender<SpyError>,
    ) -> Self {
        Self {
            session,
            source,
            event_tx,
            error_tx,
        }
    }

    pub fn spawn(self) -> JoinHandle<ReaderSummary> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> ReaderSummary {
        let mut summary = ReaderSummary::default();

        let Some(mut source) = self.source.take() else {
            warn!("Session {}: no connection to read from", self.session);
            self.terminate(SpyError::ConnectionUnavailable).await;
            return summary;
        };

        debug!("Session {}: line reader started", self.session);
        let mut buf = Vec::with_capacity(256);

        loop {
            match source.read_until(b'\n', &mut buf).await {
                Ok(_) if buf.ends_with(b"\n") => {
                    summary.bytes_read += buf.len() as u64;
                    let line = ObservedLine::new(Bytes::from(std::mem::take(&mut buf)));
                    if self.event_tx.send(line).await.is_err() {
                        debug!("Session {}: monitor loop gone, stopping reader", self.session);
                        return summary;
                    }
                    summary.lines_published += 1;
                }
                Ok(_) => {
                    if !buf.is_empty() {
                        warn!(
                            "Session {}: discarding {} trailing bytes without line delimiter",
                            self.session,
                            buf.len()
                        );
                    }
                    info!("Session {}: stream ended", self.session);
                    self.terminate(SpyError::StreamEnded).await;
                    return summary;
                }
                // partial data stays in `buf` and is completed by the next read
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Session {}: read error: {}", self.session, e);
                    self.terminate(SpyError::stream_read(e.to_string())).await;
                    return summary;
                }
            }
        }
    }

    /// Publish the single termination signal.
    ///
    /// Waits until every line already published has been received, so the
    /// monitor loop observes all lines before the termination that follows
    /// them.
    async fn terminate(&mut self, reason: SpyError) {
        match self.event_tx.reserve_many(self.event_tx.max_capacity()).await {
            Ok(permits) => drop(permits),
            Err(_) => {
                debug!(
                    "Session {}: monitor loop gone before termination ({})",
                    self.session, reason
                );
                return;
            }
        }

        if let Err(e) = self.error_tx.send(reason).await {
            debug!(
                "Session {}: termination not delivered, monitor loop gone ({})",
                self.session, e.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;
    use std::marker::PhantomData;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::{sleep, timeout};

    struct Collected {
        lines: Vec<String>,
        failures: Vec<SpyError>,
        summary: ReaderSummary,
    }

    fn channels(
        capacity: usize,
    ) -> (
        (mpsc::Sender<ObservedLine>, mpsc::Receiver<ObservedLine>),
        (mpsc::Sender<SpyError>, mpsc::Receiver<SpyError>),
    ) {
        (mpsc::channel(capacity), mpsc::channel(1))
    }

    /// Run a reader to completion while consuming its channels like the
    /// monitor loop would.
    async fn collect<R>(source: Option<R>) -> Collected
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let ((event_tx, mut event_rx), (error_tx, mut error_rx)) = channels(16);
        let handle = LineReader::new(SessionId::new(), source, event_tx, error_tx).spawn();

        let mut lines = Vec::new();
        while let Some(line) = timeout(Duration::from_secs(5), event_rx.recv()).await.unwrap() {
            lines.push(line.text().into_owned());
        }

        let mut failures = Vec::new();
        while let Some(failure) = error_rx.recv().await {
            failures.push(failure);
        }

        Collected {
            lines,
            failures,
            summary: handle.await.unwrap(),
        }
    }

    #[tokio::test]
    async fn test_immediate_eof_yields_single_stream_end() {
        let collected = collect(Some(&b""[..])).await;

        assert!(collected.lines.is_empty());
        assert_eq!(collected.failures.len(), 1);
        assert!(matches!(collected.failures[0], SpyError::StreamEnded));
        assert_eq!(collected.summary, ReaderSummary::default());
    }

    #[tokio::test]
    async fn test_lines_then_stream_end() {
        let collected = collect(Some(&b"a\r\nb\r\nc\r\n"[..])).await;

        assert_eq!(collected.lines, vec!["a", "b", "c"]);
        assert_eq!(collected.failures.len(), 1);
        assert!(matches!(collected.failures[0], SpyError::StreamEnded));
        assert_eq!(collected.summary.lines_published, 3);
        assert_eq!(collected.summary.bytes_read, 9);
    }

    #[tokio::test]
    async fn test_trailing_partial_record_is_discarded() {
        let collected = collect(Some(&b"OK\r\npartial"[..])).await;

        assert_eq!(collected.lines, vec!["OK"]);
        assert_eq!(collected.failures.len(), 1);
        assert!(matches!(collected.failures[0], SpyError::StreamEnded));
    }

    #[tokio::test]
    async fn test_transport_error_is_terminal() {
        let mock = tokio_test::io::Builder::new()
            .read(b"first\r\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
            .build();

        let collected = collect(Some(BufReader::new(mock))).await;

        assert_eq!(collected.lines, vec!["first"]);
        assert_eq!(collected.failures.len(), 1);
        match &collected.failures[0] {
            SpyError::StreamRead { message } => assert!(message.contains("reset by peer")),
            other => panic!("expected StreamRead, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interrupted_read_is_retried() {
        let mock = tokio_test::io::Builder::new()
            .read(b"GE")
            .read_error(io::Error::new(io::ErrorKind::Interrupted, "signal"))
            .read(b"T\n")
            .build();

        let collected = collect(Some(BufReader::new(mock))).await;

        assert_eq!(collected.lines, vec!["GET"]);
        assert!(matches!(collected.failures[..], [SpyError::StreamEnded]));
    }

    /// A byte source that may move between threads but not be shared.
    struct Unshared<R> {
        inner: R,
        _not_sync: PhantomData<Cell<()>>,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for Unshared<R> {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    #[tokio::test]
    async fn test_source_only_needs_send() {
        let source = BufReader::new(Unshared {
            inner: &b"INFO\r\n"[..],
            _not_sync: PhantomData,
        });

        let collected = collect(Some(source)).await;

        assert_eq!(collected.lines, vec!["INFO"]);
        assert!(matches!(collected.failures[..], [SpyError::StreamEnded]));
    }

    #[tokio::test]
    async fn test_missing_connection() {
        let collected = collect(None::<&'static [u8]>).await;

        assert!(collected.lines.is_empty());
        assert!(matches!(
            collected.failures[..],
            [SpyError::ConnectionUnavailable]
        ));
    }

    #[tokio::test]
    async fn test_termination_waits_for_published_lines() {
        let ((event_tx, mut event_rx), (error_tx, mut error_rx)) = channels(1);
        let handle =
            LineReader::new(SessionId::new(), Some(&b"a\nb\nc\n"[..]), event_tx, error_tx).spawn();

        for expected in ["a", "b"] {
            let line = timeout(Duration::from_secs(5), event_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(line.text(), expected);
        }

        // "c" is still buffered, so no termination may be visible yet
        sleep(Duration::from_millis(50)).await;
        assert!(matches!(error_rx.try_recv(), Err(TryRecvError::Empty)));

        let last = event_rx.recv().await.unwrap();
        assert_eq!(last.text(), "c");

        let termination = timeout(Duration::from_secs(5), error_rx.recv())
            .await
            .unwrap();
        assert!(matches!(termination, Some(SpyError::StreamEnded)));
        assert_eq!(handle.await.unwrap().lines_published, 3);
    }

    #[tokio::test]
    async fn test_stops_quietly_when_loop_is_gone() {
        let ((event_tx, event_rx), (error_tx, error_rx)) = channels(1);
        drop(event_rx);
        drop(error_rx);

        let reader = LineReader::new(SessionId::new(), Some(&b"a\nb\n"[..]), event_tx, error_tx);
        let summary = reader.run().await;

        assert_eq!(summary.lines_published, 0);
    }
}
