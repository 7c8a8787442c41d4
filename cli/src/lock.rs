use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use fs2::FileExt;

/// Exclusive lock on the run lock file, held until drop.
///
/// The OS releases it when the process exits, so a killed run never leaves
/// the next one locked out. The file itself stays and names the last holder.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim();
            bail!(
                "Another autojournal run is in progress (pid {})",
                if holder.is_empty() { "unknown" } else { holder }
            );
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("Failed to write lock file: {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");

        let lock = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("in progress"));
        assert!(msg.contains(&std::process::id().to_string()));

        drop(lock);
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");
        // A run that was killed leaves its file behind but no OS lock.
        fs::write(&path, "999999\n").unwrap();

        let _lock = RunLock::acquire(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
