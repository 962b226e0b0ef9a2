//! Client binary entry point: owns the pid file and shutdown listener,
//! then hands off to [`send_loop::SendLoop`].

mod connection;
mod send_loop;

use anyhow::Result;
use tracing::info;

use crate::config::ClientConfig;
use crate::signals::ShutdownFlag;

pub async fn run(cfg: ClientConfig) -> Result<()> {
    let shutdown = ShutdownFlag::new();
    shutdown.spawn_listener();

    info!(
        hosts = ?cfg.hosts,
        port = cfg.port,
        window = cfg.window,
        "prodxfer-client starting"
    );

    let mut loop_ = send_loop::SendLoop::new(cfg);
    loop_.run(&shutdown).await
}
