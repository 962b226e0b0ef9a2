//! `prodxfer-server` binary entry point: parse args, set up logging and
//! the pid file, then hand off to [`prodxfer::server::run`].

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use prodxfer::config::{ServerArgs, ServerConfig};
use prodxfer::logging;
use prodxfer::pidfile::PidFile;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    let cfg = ServerConfig::try_from(&args)?;

    let log_file = cfg
        .log_dir
        .as_ref()
        .map(|d| d.join("prodxfer-server.log").to_string_lossy().into_owned());
    let product_log = cfg
        .log_dir
        .as_ref()
        .map(|d| d.join("product.log").to_string_lossy().into_owned());
    let _log_guards = logging::init(
        cfg.verbose,
        !cfg.debug_foreground,
        log_file.as_deref(),
        product_log.as_deref(),
    );

    let pid_path = std::env::var("PID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("/var/run/prodxfer-server-{}", cfg.port)));
    let _pid_file = PidFile::create(&pid_path)?;

    if let Err(e) = prodxfer::server::run(cfg).await {
        error!(error = %e, "prodxfer-server exited with an error");
        return Err(e);
    }
    Ok(())
}
