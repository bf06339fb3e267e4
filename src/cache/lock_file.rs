use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, read_to_string, remove_file, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::error::Reason;

pub const LOCK_FILE_NAME: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    created: DateTime<Utc>,
}

/// An advisory lock on a cache directory, shared between processes through a `.lock` file
///  containing the owner's pid. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub async fn acquire(dir: &Path, timeout: Duration, stale_age: Duration) -> Result<LockFile, Reason> {
        create_dir_all(dir).await.map_err(Reason::io)?;
        let path = dir.join(LOCK_FILE_NAME);
        let start = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    let content = LockContent {
                        pid: std::process::id(),
                        created: Utc::now(),
                    };
                    let json = serde_json::to_vec(&content).map_err(Reason::io)?;
                    if let Err(e) = file.write_all(&json).await {
                        let _ = remove_file(&path).await;
                        return Err(Reason::io(e));
                    }
                    return Ok(LockFile { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_age).await {
                        warn!("removing stale lock file {}", path.display());
                        match remove_file(&path).await {
                            Ok(_) => continue,
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => return Err(Reason::io(e)),
                        }
                    }
                    if start.elapsed() >= timeout {
                        return Err(Reason::LockTimeout { path: path.display().to_string() });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(Reason::io(e)),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(_) => {}
            // the locked directory itself was purged
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!("error releasing lock file {}: {}", self.path.display(), e),
        }
    }
}

/// A lock is stale if its owner is no longer alive. A live owner keeps its lock however long it
///  takes; the age only decides where liveness can not be checked, and for lock files that can not
///  be read.
pub async fn is_stale(path: &Path, stale_age: Duration) -> bool {
    match read_to_string(path).await {
        Ok(text) => match serde_json::from_str::<LockContent>(&text) {
            Ok(content) => match process_alive(content.pid) {
                Some(true) => false,
                Some(false) => {
                    debug!("owner {} of lock file {} is gone", content.pid, path.display());
                    true
                }
                None => {
                    let age = Utc::now().signed_duration_since(content.created);
                    age.to_std().map(|age| age >= stale_age).unwrap_or(false)
                }
            },
            Err(_) => modified_before(path, stale_age).await,
        },
        Err(_) => modified_before(path, stale_age).await,
    }
}

async fn modified_before(path: &Path, age: Duration) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now().duration_since(modified).map(|d| d >= age).unwrap_or(false),
        Err(_) => false,
    }
}

/// `None` if the pid can not be checked on this platform
#[cfg(unix)]
fn process_alive(pid: u32) -> Option<bool> {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return None;
    };
    // signal 0 only checks for existence; EPERM means it exists but belongs to someone else
    let result = unsafe { libc::kill(pid, 0) };
    Some(result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM))
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> Option<bool> {
    None
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = LockFile::acquire(dir.path(), Duration::from_secs(1), Duration::from_secs(60)).await.unwrap();
        assert!(dir.path().join(LOCK_FILE_NAME).exists());

        // held by a live process (this one) -> times out
        let second = LockFile::acquire(dir.path(), Duration::from_millis(120), Duration::from_secs(60)).await;
        assert!(matches!(second, Err(Reason::LockTimeout { .. })));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        let _again = LockFile::acquire(dir.path(), Duration::from_secs(1), Duration::from_secs(60)).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_old_lock_of_live_owner_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let content = LockContent { pid: std::process::id(), created: Utc::now() - chrono::Duration::hours(2) };
        std::fs::write(&path, serde_json::to_vec(&content).unwrap()).unwrap();

        assert!(!is_stale(&path, Duration::from_secs(60)).await);
        let second = LockFile::acquire(dir.path(), Duration::from_millis(120), Duration::from_secs(60)).await;
        assert!(matches!(second, Err(Reason::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_unreadable_lock_is_judged_by_age() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, b"garbage").unwrap();

        assert!(!is_stale(&path, Duration::from_secs(3600)).await);
        assert!(is_stale(&path, Duration::ZERO).await);
        let _lock = LockFile::acquire(dir.path(), Duration::from_millis(200), Duration::ZERO).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_owner_makes_lock_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        // pid_max on Linux is at most 2^22
        let content = LockContent { pid: 4_999_999, created: Utc::now() };
        std::fs::write(&path, serde_json::to_vec(&content).unwrap()).unwrap();

        assert!(is_stale(&path, Duration::from_secs(3600)).await);
        let _lock = LockFile::acquire(dir.path(), Duration::from_millis(200), Duration::from_secs(3600)).await.unwrap();
    }
}
