//! Server binary entry point: bind the listener, build the output store
//! backend, and run the connection dispatcher.

pub mod dispatcher;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::signals::ShutdownFlag;
use crate::store::{OutputStoreBackend, StoreBackendFactory, StoreBackendKind};

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let shutdown = ShutdownFlag::new();
    shutdown.spawn_listener();

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %addr,
        max_workers = cfg.max_workers,
        outdir = %cfg.output_dir.display(),
        "prodxfer-server listening"
    );

    #[cfg(feature = "wmo-table")]
    let kind = StoreBackendKind::SymlinkTable;
    #[cfg(not(feature = "wmo-table"))]
    let kind = StoreBackendKind::Default;

    let store = StoreBackendFactory::create(kind, cfg.output_dir.clone(), cfg.overwrite)
        .context("creating output store backend")?;
    let store: Arc<dyn OutputStoreBackend> = Arc::from(store);

    let cfg = Arc::new(cfg);
    dispatcher::run(listener, cfg, store, shutdown).await
}
