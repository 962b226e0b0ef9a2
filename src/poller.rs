//! Directory poller: scans configured input directories and builds a
//! priority-ordered queue of candidate products.
//!
//! The original kept the queue, its count, and the last poll time as
//! function-local `static`s inside `get_next_file()`. That pattern
//! doesn't translate: here the same state lives as owned fields on
//! [`Poller`], constructed once by the caller and threaded through
//! explicitly on every call to [`Poller::poll`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::defaults::{MAX_QUEUE_LEN, ZERO_LEN_GRACE};

/// One directory the poller watches, with its associated priority.
/// Higher `priority` values are drained first.
#[derive(Debug, Clone)]
pub struct InputDir {
    pub path: PathBuf,
    pub priority: i32,
}

/// A file discovered by the poller, ready to be handed to the sender.
#[derive(Debug, Clone)]
pub struct PolledItem {
    pub path: PathBuf,
    pub priority: i32,
    pub size: u64,
    /// Modification time, used to order same-priority items and to
    /// decide whether a zero-length file is still mid-write.
    pub queue_time: SystemTime,
}

/// Directory scanner/priority-queue builder.
pub struct Poller {
    dirs: Vec<InputDir>,
    max_queue_len: usize,
    /// If set, the single most recently modified file across every
    /// watched directory is withheld each poll -- used for feeds where
    /// a file still being appended to shouldn't be sent until a later
    /// arrival proves it's done.
    wait_last_file: bool,
}

impl Poller {
    pub fn new(dirs: Vec<InputDir>, wait_last_file: bool) -> Self {
        Self {
            dirs,
            max_queue_len: MAX_QUEUE_LEN,
            wait_last_file,
        }
    }

    pub fn with_max_queue_len(mut self, max: usize) -> Self {
        self.max_queue_len = max;
        self
    }

    /// Scan every configured directory, skip paths already in flight
    /// (tracked in `in_flight`), and return candidates ordered by
    /// descending priority then ascending queue time -- matching the
    /// original comparator's tie-break. If `wait_last_file` is set, the
    /// single most recently modified item across the whole snapshot
    /// (not per directory) is withheld until a newer one arrives.
    pub fn poll(&self, in_flight: &HashSet<PathBuf>) -> Result<Vec<PolledItem>> {
        let mut items = Vec::new();
        for dir in &self.dirs {
            items.extend(self.scan_dir(dir, in_flight)?);
        }

        if self.wait_last_file {
            if let Some((newest, _)) = items
                .iter()
                .enumerate()
                .max_by_key(|(_, item)| item.queue_time)
            {
                items.remove(newest);
            }
        }

        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.queue_time.cmp(&b.queue_time))
        });
        items.truncate(self.max_queue_len);
        Ok(items)
    }

    fn scan_dir(&self, dir: &InputDir, in_flight: &HashSet<PathBuf>) -> Result<Vec<PolledItem>> {
        let mut out = Vec::new();
        let read_dir = match std::fs::read_dir(&dir.path) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(e).with_context(|| format!("polling {}", dir.path.display()))
            }
        };
        for entry in read_dir {
            let entry = entry.with_context(|| format!("reading entry in {}", dir.path.display()))?;
            let path = entry.path();
            if in_flight.contains(&path) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }
            if meta.len() == 0 && !is_stale_zero_length(&meta) {
                continue;
            }
            let queue_time = meta.modified().unwrap_or(SystemTime::now());
            out.push(PolledItem {
                path,
                priority: dir.priority,
                size: meta.len(),
                queue_time,
            });
        }
        Ok(out)
    }
}

/// A zero-length file younger than [`ZERO_LEN_GRACE`] is assumed to
/// still be mid-write by the producer and is skipped for this poll.
fn is_stale_zero_length(meta: &std::fs::Metadata) -> bool {
    match meta.modified() {
        Ok(mtime) => match SystemTime::now().duration_since(mtime) {
            Ok(age) => age >= ZERO_LEN_GRACE,
            Err(_) => false,
        },
        Err(_) => true,
    }
}

/// Paths currently in the sender's table, used by callers to build the
/// `in_flight` set passed to [`Poller::poll`] each cycle.
pub fn dedup_against(paths: impl IntoIterator<Item = PathBuf>) -> HashSet<PathBuf> {
    paths.into_iter().collect()
}
