//! Output store backend: pluggable persistence for a received product.
//!
//! Mirrors the teacher's `IpcTransport`/`TransportFactory` pattern: a
//! `Send + Sync` async trait with one production implementation
//! selected at startup by a small factory.

mod default;
#[cfg(feature = "wmo-table")]
mod symlink_table;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

pub use default::DefaultStoreBackend;
#[cfg(feature = "wmo-table")]
pub use symlink_table::SymlinkTableStoreBackend;

use crate::wmo::WmoHeading;

/// Everything the store needs to know about a received product besides
/// its bytes.
#[derive(Debug, Clone)]
pub struct StoreMeta {
    pub seqno: u32,
    pub heading: WmoHeading,
    /// Connection-message SOURCE token, if one was sent.
    pub source: Option<String>,
}

/// Pluggable persistence strategy for received product bytes.
///
/// `DefaultStoreBackend` names files by pid/seqno (§4.10's baseline);
/// `SymlinkTableStoreBackend` additionally maintains a routing-table of
/// symlinks keyed by WMO heading, gated behind the `wmo-table` feature
/// since it's an optional, legacy-compatible extra.
#[async_trait]
pub trait OutputStoreBackend: Send + Sync {
    /// Persist `body` for the product described by `meta`, returning the
    /// path it was written to.
    async fn store(&self, body: &[u8], meta: &StoreMeta) -> Result<PathBuf>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Which backend a server instance was configured to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Default,
    #[cfg(feature = "wmo-table")]
    SymlinkTable,
}

/// Factory that builds a boxed backend from a [`StoreBackendKind`],
/// mirroring the teacher's `TransportFactory::create`.
pub struct StoreBackendFactory;

impl StoreBackendFactory {
    pub fn create(
        kind: StoreBackendKind,
        output_dir: PathBuf,
        overwrite: bool,
    ) -> Result<Box<dyn OutputStoreBackend>> {
        match kind {
            StoreBackendKind::Default => {
                Ok(Box::new(DefaultStoreBackend::new(output_dir, overwrite)))
            }
            #[cfg(feature = "wmo-table")]
            StoreBackendKind::SymlinkTable => Ok(Box::new(SymlinkTableStoreBackend::new(
                output_dir, overwrite,
            ))),
        }
    }
}
