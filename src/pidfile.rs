//! PID file creation, single-instance locking, and cleanup on drop.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// A pid file written at construction and removed when dropped, so a
/// process that exits (cleanly or via `?`-propagated error) never
/// leaves a stale lock behind.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the pid file at `path`, failing if one already exists and
    /// names a process that's still alive.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Ok(existing) = fs::read_to_string(&path) {
            if let Ok(pid) = existing.trim().parse::<i32>() {
                if process_alive(pid) {
                    bail!("pid file {} names running process {pid}", path.display());
                }
            }
        }
        let mut file = File::create(&path)
            .with_context(|| format!("creating pid file {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("writing pid file {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // Signal 0 performs no action but still validates that a process
    // with this pid exists and is owned by (or signalable by) us.
    unsafe { libc_kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

#[cfg(unix)]
extern "C" {
    #[link_name = "kill"]
    fn libc_kill(pid: i32, sig: i32) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_writes_current_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prodxfer.pid");
        let pf = PidFile::create(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        drop(pf);
        assert!(!path.exists());
    }

    #[test]
    fn create_rejects_pid_file_naming_a_live_process() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prodxfer.pid");
        fs::write(&path, std::process::id().to_string()).unwrap();
        assert!(PidFile::create(&path).is_err());
    }

    #[test]
    fn create_overwrites_a_stale_pid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prodxfer.pid");
        // PID 1 is init; if this happens to run as pid 1 in some
        // container context the other test above covers that path.
        fs::write(&path, "999999").unwrap();
        assert!(PidFile::create(&path).is_ok());
    }
}
