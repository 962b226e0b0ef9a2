//! Final disposition of a product: filing it into the bounded circular
//! `sent/` or `fail/` directory after the send loop is done with it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A bounded, zero-padded circular directory of `count` slots. Filing a
/// product into slot `i` overwrites whatever previously lived there,
/// so the directory never grows past `count` entries.
pub struct CircularDir {
    dir: PathBuf,
    count: usize,
    next_index: usize,
}

impl CircularDir {
    pub fn new(dir: PathBuf, count: usize) -> Self {
        Self {
            dir,
            count,
            next_index: 0,
        }
    }

    fn width(&self) -> usize {
        self.count.saturating_sub(1).to_string().len().max(1)
    }

    /// File `src` into the next circular slot, moving (not copying) it
    /// when possible. Returns the destination path.
    pub fn file(&mut self, src: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let name = format!("{:0width$}", self.next_index, width = self.width());
        let dest = self.dir.join(name);
        self.next_index = (self.next_index + 1) % self.count.max(1);
        my_rename(src, &dest)?;
        Ok(dest)
    }
}

/// Rename `src` to `dest`, falling back to copy-then-remove when the
/// two paths live on different filesystems (`rename(2)` returns
/// `EXDEV` in that case, surfaced by `std::fs::rename` as
/// `ErrorKind::CrossesDevices` on recent stdlibs, `Other` otherwise).
pub fn my_rename(src: &Path, dest: &Path) -> Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            std::fs::copy(src, dest)
                .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
            std::fs::remove_file(src)
                .with_context(|| format!("removing {} after cross-device copy", src.display()))?;
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("renaming {} to {}", src.display(), dest.display())),
    }
}

/// `EXDEV`, the errno `rename(2)` returns when source and destination
/// are on different filesystems.
const EXDEV: i32 = 18;

fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(EXDEV)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn files_wrap_around_after_count_slots() {
        let dir = tempdir().unwrap();
        let mut circ = CircularDir::new(dir.path().join("sent"), 3);
        for i in 0..5 {
            let src = dir.path().join(format!("src{i}"));
            std::fs::write(&src, format!("item {i}")).unwrap();
            circ.file(&src).unwrap();
        }
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("sent"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["0", "1", "2"]);
    }

    #[test]
    fn filed_content_matches_source() {
        let dir = tempdir().unwrap();
        let mut circ = CircularDir::new(dir.path().join("fail"), 10);
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"payload").unwrap();
        let dest = circ.file(&src).unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"payload");
        assert!(!src.exists());
    }

    #[test]
    fn rename_within_same_filesystem_moves_the_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dest = dir.path().join("b");
        std::fs::write(&src, b"hi").unwrap();
        my_rename(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"hi");
    }
}
