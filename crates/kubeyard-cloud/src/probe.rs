//! TCP connect probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

use crate::traits::ReachabilityProbe;

/// Treats an endpoint as reachable once a TCP connect completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let connect = TcpStream::connect((host, port));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!(%host, port, error = %e, "connect failed");
                false
            }
            Err(_) => {
                trace!(%host, port, "connect timed out");
                false
            }
        }
    }
}
