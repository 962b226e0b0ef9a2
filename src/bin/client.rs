//! `prodxfer-client` binary entry point: parse args, set up logging and
//! the pid file, then hand off to [`prodxfer::client::run`].

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use prodxfer::config::{ClientArgs, ClientConfig};
use prodxfer::logging;
use prodxfer::pidfile::PidFile;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse();
    let cfg = ClientConfig::try_from(&args)?;

    let log_file = cfg
        .log_dir
        .as_ref()
        .map(|d| d.join("prodxfer-client.log").to_string_lossy().into_owned());
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

    // Spec §6: overridable via PID_FILE, otherwise named after the
    // primary host and port so multiple clients on one box don't collide.
    let pid_path = std::env::var("PID_FILE").map(PathBuf::from).unwrap_or_else(|_| {
        PathBuf::from(format!("/var/run/prodxfer-client-{}-{}", cfg.hosts[0], cfg.port))
    });
    let _pid_file = PidFile::create(&pid_path)?;

    if let Err(e) = prodxfer::client::run(cfg).await {
        error!(error = %e, "prodxfer-client exited with an error");
        return Err(e);
    }
    Ok(())
}
