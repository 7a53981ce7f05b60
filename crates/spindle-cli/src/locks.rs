//! Repository lock so that overlapping cron runs do not interleave.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive `flock` on the repository's lock file, held until dropped.
///
/// The kernel releases the lock when the holder exits, so a crashed run never
/// leaves a stale lock behind. The file itself is left in place.
pub struct RepoLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

impl RepoLock {
    /// Acquire the lock without blocking.
    ///
    /// Fails if another process holds it; the error names that process's PID
    /// when the lock file records one.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        if !try_flock_exclusive(&file)? {
            match read_holder_pid(&mut file) {
                Some(pid) => anyhow::bail!(
                    "Another spindle process (PID {}) is working on this repository",
                    pid
                ),
                None => anyhow::bail!("Another spindle process is working on this repository"),
            }
        }

        write_holder_pid(&mut file)?;
        tracing::debug!("Acquired {}", lock_path.display());
        Ok(Self {
            path: lock_path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder_pid(file: &mut File) -> Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.sync_all()?;
    Ok(())
}

fn read_holder_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("spindle.lock");

        let first = RepoLock::acquire(&lock_path).unwrap();
        let err = RepoLock::acquire(&lock_path).err().unwrap();
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(first);
        assert!(RepoLock::acquire(&lock_path).is_ok());
    }

    #[test]
    fn test_lock_records_pid() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("spindle.lock");

        let lock = RepoLock::acquire(&lock_path).unwrap();
        assert_eq!(lock.path(), lock_path.as_path());
        let contents = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("spindle.lock");
        fs::write(&lock_path, "999999").unwrap();

        assert!(RepoLock::acquire(&lock_path).is_ok());
    }
}
