//! Optional legacy-compatible output backend: files named by WMO
//! heading, with a `latest/` symlink tree for routing consumers that
//! expect a stable path per heading.
//!
//! The original's `INCLUDE_WMO_FILE_TBL` path attached to a shared-memory
//! routing table (`acq_wmo_attach_tbl`) maintained by a separate
//! subsystem this crate does not reimplement (see DESIGN.md). What's
//! kept is the externally visible behavior that table gave callers: a
//! filename derived from the heading, plus a symlink at a fixed path per
//! heading that always points at the most recent delivery.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{OutputStoreBackend, StoreMeta};

pub struct SymlinkTableStoreBackend {
    output_dir: PathBuf,
    overwrite: bool,
}

impl SymlinkTableStoreBackend {
    pub fn new(output_dir: PathBuf, overwrite: bool) -> Self {
        Self {
            output_dir,
            overwrite,
        }
    }

    fn heading_key(meta: &StoreMeta) -> String {
        if meta.heading.is_empty() {
            "UNKNOWN".to_string()
        } else {
            format!("{}_{}", meta.heading.ttaaii, meta.heading.cccc)
        }
    }
}

#[async_trait]
impl OutputStoreBackend for SymlinkTableStoreBackend {
    async fn store(&self, body: &[u8], meta: &StoreMeta) -> Result<PathBuf> {
        let data_dir = self.output_dir.join("wmo");
        let latest_dir = self.output_dir.join("latest");
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating {}", data_dir.display()))?;
        tokio::fs::create_dir_all(&latest_dir)
            .await
            .with_context(|| format!("creating {}", latest_dir.display()))?;

        let key = Self::heading_key(meta);
        let data_path = data_dir.join(format!("{key}.{:06}", meta.seqno % 1_000_000));
        let mut file = tokio::fs::File::create(&data_path)
            .await
            .with_context(|| format!("creating {}", data_path.display()))?;
        file.write_all(body)
            .await
            .with_context(|| format!("writing {}", data_path.display()))?;
        file.flush().await?;

        let link_path = latest_dir.join(&key);
        if tokio::fs::symlink_metadata(&link_path).await.is_ok() {
            tokio::fs::remove_file(&link_path)
                .await
                .with_context(|| format!("removing stale symlink {}", link_path.display()))?;
        }
        #[cfg(unix)]
        tokio::fs::symlink(&data_path, &link_path)
            .await
            .with_context(|| format!("linking {} to {}", link_path.display(), data_path.display()))?;

        let _ = self.overwrite; // data files are seqno-unique; overwrite only governs the default backend

        Ok(data_path)
    }

    fn name(&self) -> &'static str {
        "wmo-table"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wmo::WmoHeading;
    use tempfile::tempdir;

    #[tokio::test]
    async fn files_under_wmo_and_links_latest() {
        let dir = tempdir().unwrap();
        let backend = SymlinkTableStoreBackend::new(dir.path().to_path_buf(), false);
        let meta = StoreMeta {
            seqno: 7,
            heading: WmoHeading {
                ttaaii: "FTUS43".into(),
                cccc: "KWBC".into(),
                ddhhmm: "261200".into(),
                bbb: String::new(),
                nnnxxx: String::new(),
            },
            source: None,
        };
        let data_path = backend.store(b"body", &meta).await.unwrap();
        assert!(data_path.starts_with(dir.path().join("wmo")));

        let link_path = dir.path().join("latest").join("FTUS43_KWBC");
        let target = tokio::fs::read_link(&link_path).await.unwrap();
        assert_eq!(target, data_path);
    }

    #[tokio::test]
    async fn second_delivery_repoints_the_symlink() {
        let dir = tempdir().unwrap();
        let backend = SymlinkTableStoreBackend::new(dir.path().to_path_buf(), false);
        let heading = WmoHeading {
            ttaaii: "FTUS43".into(),
            cccc: "KWBC".into(),
            ddhhmm: "261200".into(),
            bbb: String::new(),
            nnnxxx: String::new(),
        };
        let first = backend
            .store(
                b"a",
                &StoreMeta {
                    seqno: 1,
                    heading: heading.clone(),
                    source: None,
                },
            )
            .await
            .unwrap();
        let second = backend
            .store(
                b"b",
                &StoreMeta {
                    seqno: 2,
                    heading,
                    source: None,
                },
            )
            .await
            .unwrap();
        assert_ne!(first, second);
        let link_path = dir.path().join("latest").join("FTUS43_KWBC");
        let target = tokio::fs::read_link(&link_path).await.unwrap();
        assert_eq!(target, second);
    }
}
