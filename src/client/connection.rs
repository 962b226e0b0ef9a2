//! Connect-with-failover and socket tuning for the client's single
//! long-lived session.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::defaults::DISCARD_PORT;

/// Round-robins through the configured hosts on every failed attempt,
/// matching the original's `host_idx` wraparound in `poll_and_send`.
pub struct HostRotation {
    hosts: Vec<String>,
    idx: usize,
}

impl HostRotation {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts, idx: 0 }
    }

    pub fn current(&self) -> &str {
        &self.hosts[self.idx]
    }

    pub fn advance(&mut self) {
        self.idx = (self.idx + 1) % self.hosts.len();
    }
}

/// Connect to the current host in `rotation`, advancing it on failure.
/// A host literally named `"null"` resolves to loopback on the discard
/// port, matching the original's test/benchmark affordance.
pub async fn connect(
    rotation: &mut HostRotation,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream> {
    let host = rotation.current().to_string();
    let (resolve_host, resolve_port) = if host == "null" {
        ("127.0.0.1".to_string(), DISCARD_PORT)
    } else {
        (host.clone(), port)
    };

    let addr_result: Result<SocketAddr> = tokio::net::lookup_host((resolve_host.as_str(), resolve_port))
        .await
        .with_context(|| format!("resolving {resolve_host}:{resolve_port}"))?
        .next()
        .with_context(|| format!("no addresses for {resolve_host}:{resolve_port}"));

    let result = async {
        let addr = addr_result?;
        tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .context("connect timed out")?
            .with_context(|| format!("connecting to {addr}"))
    }
    .await;

    match result {
        Ok(stream) => {
            tune_socket(&stream)?;
            debug!(host = %host, "connected");
            Ok(stream)
        }
        Err(e) => {
            warn!(host = %host, error = %e, "connect failed, rotating host");
            rotation.advance();
            Err(e)
        }
    }
}

fn tune_socket(stream: &TcpStream) -> Result<()> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_nodelay(true).context("setting TCP_NODELAY")?;
    sock_ref
        .set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))
        .context("setting SO_KEEPALIVE")?;
    Ok(())
}
