//! A scripted stand-in for a redis instance in `MONITOR` mode.
//!
//! The stub accepts exactly one connection, optionally waits for the
//! subscribe request, writes its scripted lines and then closes its side.
//! Everything the client wrote is recorded in a [`StubTranscript`].

use anyhow::{Context, Result};
use spy_core::NetAddr;
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What the stub does once a client connects
#[derive(Debug, Clone, Default)]
pub struct StubScript {
    pub lines: Vec<Vec<u8>>,
    /// Read the client's request line before sending anything
    pub await_subscribe: bool,
    /// Keep the connection open after the lines until released or until
    /// the client closes
    pub hold_open: bool,
}

impl StubScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A script that waits for `monitor\r\n` and then replays `lines`.
    pub fn monitor<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        Self::new().awaiting_subscribe().with_lines(lines)
    }

    pub fn with_lines<I, L>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        self.lines
            .extend(lines.into_iter().map(|line| line.as_ref().to_vec()));
        self
    }

    pub fn awaiting_subscribe(mut self) -> Self {
        self.await_subscribe = true;
        self
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// Record of one stub connection
#[derive(Debug, Clone, Default)]
pub struct StubTranscript {
    /// Every byte the client wrote
    pub received: Vec<u8>,
    pub lines_sent: usize,
    /// The client closed its side before the stub finished
    pub client_closed: bool,
}

/// Single-connection stub store on a loopback port
pub struct StubStore {
    addr: NetAddr,
    release_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<StubTranscript>>,
}

impl StubStore {
    /// Bind an ephemeral loopback port and start serving `script`.
    pub async fn start(script: StubScript) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding stub store")?;
        let local = listener.local_addr()?;
        let addr = NetAddr::new(local.ip().to_string(), local.port());
        info!("Stub store listening on {}", addr);

        let (release_tx, release_rx) = oneshot::channel();
        let handle = tokio::spawn(serve(listener, script, release_rx));

        Ok(Self {
            addr,
            release_tx: Some(release_tx),
            handle,
        })
    }

    pub fn addr(&self) -> NetAddr {
        self.addr.clone()
    }

    /// Let a held-open connection close.
    pub fn release(&mut self) {
        if let Some(release_tx) = self.release_tx.take() {
            let _ = release_tx.send(());
        }
    }

    /// Wait for the connection to finish and return what happened on it.
    pub async fn finish(mut self) -> Result<StubTranscript> {
        self.release();
        self.handle.await.context("stub store task panicked")?
    }

    /// Stop serving without waiting for a connection.
    pub fn abort(self) {
        self.handle.abort();
    }
}

async fn serve(
    listener: TcpListener,
    script: StubScript,
    mut release_rx: oneshot::Receiver<()>,
) -> Result<StubTranscript> {
    let (mut stream, peer) = listener.accept().await.context("accepting client")?;
    debug!("Stub store accepted {}", peer);
    // one connection only
    drop(listener);

    let mut transcript = StubTranscript::default();

    if script.await_subscribe {
        read_request_line(&mut stream, &mut transcript).await?;
    }

    for line in &script.lines {
        stream.write_all(line).await.context("writing line")?;
        transcript.lines_sent += 1;
    }
    stream.flush().await?;

    if script.hold_open && !transcript.client_closed {
        let mut chunk = [0u8; 1024];
        loop {
            tokio::select! {
                _ = &mut release_rx => break,
                read = stream.read(&mut chunk) => match read {
                    Ok(0) => {
                        transcript.client_closed = true;
                        break;
                    }
                    Ok(n) => transcript.received.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                        transcript.client_closed = true;
                        break;
                    }
                    Err(e) => return Err(e).context("reading from client"),
                },
            }
        }
    }

    stream.shutdown().await.ok();

    if !transcript.client_closed {
        drain_until_closed(&mut stream, &mut transcript).await?;
    }

    debug!(
        "Stub store done: {} line(s) sent, {} byte(s) received",
        transcript.lines_sent,
        transcript.received.len()
    );
    Ok(transcript)
}

async fn read_request_line(stream: &mut TcpStream, transcript: &mut StubTranscript) -> Result<()> {
    let mut chunk = [0u8; 256];
    while !transcript.received.ends_with(b"\n") {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                transcript.client_closed = true;
                break;
            }
            Ok(n) => transcript.received.extend_from_slice(&chunk[..n]),
            Err(e) => return Err(e).context("reading subscribe request"),
        }
    }
    Ok(())
}

async fn drain_until_closed(stream: &mut TcpStream, transcript: &mut StubTranscript) -> Result<()> {
    let mut rest = Vec::new();
    match stream.read_to_end(&mut rest).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        Err(e) => return Err(e).context("draining client"),
    }
    transcript.received.extend_from_slice(&rest);
    transcript.client_closed = true;
    Ok(())
}
