//! Default output store: pid/seqno-named flat files under the output
//! directory (§4.10's baseline, no `INCLUDE_WMO_FILE_TBL`).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{OutputStoreBackend, StoreMeta};

/// Writes `<outdir>/<pid:05>-<seqno % 1_000_000:06>`.
pub struct DefaultStoreBackend {
    output_dir: PathBuf,
    overwrite: bool,
    pid: u32,
}

impl DefaultStoreBackend {
    pub fn new(output_dir: PathBuf, overwrite: bool) -> Self {
        Self {
            output_dir,
            overwrite,
            pid: std::process::id(),
        }
    }

    fn path_for(&self, seqno: u32) -> PathBuf {
        self.output_dir.join(format!(
            "{:05}-{:06}",
            self.pid % 100_000,
            seqno % 1_000_000
        ))
    }
}

#[async_trait]
impl OutputStoreBackend for DefaultStoreBackend {
    async fn store(&self, body: &[u8], meta: &StoreMeta) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("creating output dir {}", self.output_dir.display()))?;
        let path = self.path_for(meta.seqno);
        if !self.overwrite && tokio::fs::metadata(&path).await.is_ok() {
            bail!("output file {} already exists", path.display());
        }
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        file.write_all(body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        file.flush().await?;
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "default"
    }
}
