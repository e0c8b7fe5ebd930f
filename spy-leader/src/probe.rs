//! Peer liveness checks.

use spy_core::NetAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Returns `true` if `addr` accepts a TCP connection within `check_timeout`.
///
/// The connection is dropped immediately; the peer's election listener
/// only has to accept it.
pub async fn probe_peer(addr: &NetAddr, check_timeout: Duration) -> bool {
    let start_time = Instant::now();
    let result = timeout(check_timeout, TcpStream::connect(addr.to_string())).await;
    let response_time = start_time.elapsed();

    match result {
        Ok(Ok(_stream)) => {
            debug!("Peer {} alive ({:?})", addr, response_time);
            true
        }
        Ok(Err(e)) => {
            debug!("Peer {} unreachable: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("Peer {} probe timed out after {:?}", addr, check_timeout);
            false
        }
    }
}
