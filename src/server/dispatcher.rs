//! Accept loop: one supervised task per connection, capped at
//! `cfg.max_workers`.
//!
//! Grounded in `serv_dispatch.c`'s `dispatcher()`/`fork_service()`/
//! `verify_workers()`, which forked one child process per accepted
//! connection and tracked them in a fixed `WorkerPids[]` table, gated on
//! `WorkerCount >= max_worker`. Here a `tokio::task::JoinSet` plays the
//! role of that worker table: spawning is the fork, and a finished
//! `JoinSet` slot is a reaped child. `max_workers == 0` reproduces the
//! original's non-forking fallback by running the connection inline on
//! the dispatcher task itself, one connection at a time.
//!
//! Right after accepting, `serv_dispatch.c` resolves the peer's hostname
//! with `gethostbyaddr`, falling back to `"unknown"`. `dns-lookup`'s
//! `lookup_addr` is the idiomatic equivalent (it wraps `getnameinfo`),
//! run via `spawn_blocking` since it's a blocking libc call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::server::worker;
use crate::signals::ShutdownFlag;
use crate::store::OutputStoreBackend;

/// How often the worker-table-full wait and the shutdown-poll loop
/// recheck their conditions.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(
    listener: TcpListener,
    cfg: Arc<ServerConfig>,
    store: Arc<dyn OutputStoreBackend>,
    shutdown: ShutdownFlag,
) -> Result<()> {
    let mut workers: JoinSet<()> = JoinSet::new();

    while !shutdown.is_set() {
        while cfg.max_workers > 0 && workers.len() >= cfg.max_workers && !shutdown.is_set() {
            tokio::select! {
                _ = workers.join_next() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
        if shutdown.is_set() {
            break;
        }

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = wait_for_shutdown(&shutdown) => break,
        };

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        if let Err(e) = tune_socket(&stream) {
            warn!(error = %e, "tuning accepted socket");
        }

        let peer = resolve_peer_host(addr).await;
        info!(peer = %peer, port = addr.port(), "accepted connection");

        let task_cfg = cfg.clone();
        let task_store = store.clone();

        if cfg.max_workers == 0 {
            let result_peer = peer.clone();
            if let Err(e) = worker::serve(stream, peer, task_cfg, task_store).await {
                error!(peer = %result_peer, error = %e, "connection handler failed");
            }
        } else {
            workers.spawn(async move {
                let result_peer = peer.clone();
                if let Err(e) = worker::serve(stream, peer, task_cfg, task_store).await {
                    error!(peer = %result_peer, error = %e, "connection handler failed");
                }
            });
        }
    }

    info!(pending = workers.len(), "dispatcher shutting down, draining workers");
    while workers.join_next().await.is_some() {}
    Ok(())
}

async fn wait_for_shutdown(shutdown: &ShutdownFlag) {
    while !shutdown.is_set() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Reverse-resolve the accepted peer's IP, falling back to `"unknown"`
/// on any lookup failure (`serv_dispatch.c`'s `gethostbyaddr` fallback).
async fn resolve_peer_host(addr: std::net::SocketAddr) -> String {
    let ip = addr.ip();
    tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn tune_socket(stream: &TcpStream) -> Result<()> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_nodelay(true).context("setting TCP_NODELAY")?;
    sock_ref
        .set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))
        .context("setting SO_KEEPALIVE")?;
    Ok(())
}
