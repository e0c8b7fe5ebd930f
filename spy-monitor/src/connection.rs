//! TCP connection to the observed redis instance.
//!
//! The connection is split on open: the buffered read half is handed to the
//! line reader once, the write half stays here for the subscribe request and
//! for shutdown.

use bytes::{BufMut, Bytes, BytesMut};
use spy_core::{NetAddr, Result, SpyError};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// The subscribe request: redis `MONITOR` as an inline command.
pub const SUBSCRIBE_COMMAND: &[u8] = b"monitor\r\n";

/// Size of the read buffer wrapped around the read half.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Buffered read half handed to the line reader.
pub type StreamSource = BufReader<OwnedReadHalf>;

/// Serialise the subscribe request into a single frame.
pub fn subscribe_frame() -> Bytes {
    let mut buf = BytesMut::with_capacity(SUBSCRIBE_COMMAND.len());
    buf.put_slice(SUBSCRIBE_COMMAND);
    buf.freeze()
}

/// An open connection to the observed instance
#[derive(Debug)]
pub struct StreamConnection {
    peer: NetAddr,
    reader: Option<StreamSource>,
    writer: OwnedWriteHalf,
}

impl StreamConnection {
    /// Dial `addr`, giving up after `connect_timeout`
    pub async fn open(addr: &NetAddr, connect_timeout: Duration) -> Result<Self> {
        let target = addr.to_string();
        debug!("Dialing {}", target);

        let stream = match timeout(connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(SpyError::connect(target, e.to_string())),
            Err(_) => {
                return Err(SpyError::ConnectTimeout {
                    addr: target,
                    timeout: connect_timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", target, e);
        }

        let (read_half, write_half) = stream.into_split();
        info!("Connected to {}", target);

        Ok(Self {
            peer: addr.clone(),
            reader: Some(BufReader::with_capacity(READ_BUFFER_SIZE, read_half)),
            writer: write_half,
        })
    }

    pub fn peer(&self) -> &NetAddr {
        &self.peer
    }

    /// Hand the read half to the line reader. `None` once taken.
    pub fn take_reader(&mut self) -> Option<StreamSource> {
        self.reader.take()
    }

    /// Write one frame with a single `write_all`.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer
            .write_all(frame)
            .await
            .map_err(|e| SpyError::write(format!("Failed to write to {}: {}", self.peer, e)))
    }

    /// Shut down the write side and release the handle.
    ///
    /// A read half still held by a line reader is released when that task
    /// is dropped.
    pub async fn close(mut self) -> Result<()> {
        let result = self.writer.shutdown().await;
        debug!("Closed connection to {}", self.peer);
        result.map_err(SpyError::from)
    }
}
