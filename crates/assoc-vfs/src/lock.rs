//! Advisory inter-process locks built on `flock`.
//!
//! Each acquisition opens its own file description, so two holders in the
//! same process contend exactly like two processes do. Calls go through
//! [`FileExt`] explicitly since newer std `File` has same-named methods.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use assoc_types::SessionId;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{VfsError, VfsResult};

const LOCKS_DIR: &str = "locks";
const MIN_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Held lock. Released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

/// An exclusive lock on a single file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> VfsResult<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(VfsError::io(parent))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(VfsError::io(&self.path))
    }

    fn guard(&self, file: File) -> LockGuard {
        LockGuard {
            file,
            path: self.path.clone(),
        }
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> VfsResult<LockGuard> {
        let file = self.open()?;
        FileExt::lock_exclusive(&file).map_err(VfsError::io(&self.path))?;
        Ok(self.guard(file))
    }

    /// Take the lock if it is free right now.
    pub fn try_lock(&self) -> VfsResult<Option<LockGuard>> {
        let file = self.open()?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(self.guard(file))),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(VfsError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Acquire within `max_wait`, polling with back-off. `None` blocks forever.
    pub fn timed_lock(&self, max_wait: Option<Duration>) -> VfsResult<LockGuard> {
        let Some(max_wait) = max_wait else {
            return self.lock();
        };
        let file = self.open()?;
        let start = Instant::now();
        let mut backoff = MIN_BACKOFF;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(self.guard(file)),
                Err(e) if is_contended(&e) => {}
                Err(e) => {
                    return Err(VfsError::Io {
                        path: self.path.clone(),
                        source: e,
                    })
                }
            }
            let waited = start.elapsed();
            if waited >= max_wait {
                debug!(path = %self.path.display(), ?waited, "lock wait expired");
                return Err(VfsError::LockTimeout {
                    path: self.path.clone(),
                    waited,
                });
            }
            thread::sleep(backoff.min(max_wait - waited));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Directory holding the named locks of one data source under `root`.
pub fn lock_dir(root: &Path, data_source: &str) -> PathBuf {
    let digest = blake3::hash(data_source.as_bytes()).to_hex();
    root.join(LOCKS_DIR).join(&digest.as_str()[..16])
}

/// A lock identified by name, scoped to one data source.
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: String,
    file: FileLock,
}

impl NamedLock {
    pub fn new(root: &Path, data_source: &str, name: &str) -> Self {
        let path = lock_dir(root, data_source).join(format!("{name}.lock"));
        Self {
            name: name.to_string(),
            file: FileLock::new(path),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn lock(&self) -> VfsResult<LockGuard> {
        self.file.lock()
    }

    pub fn try_lock(&self) -> VfsResult<Option<LockGuard>> {
        self.file.try_lock()
    }

    pub fn timed_lock(&self, max_wait: Option<Duration>) -> VfsResult<LockGuard> {
        self.file.timed_lock(max_wait)
    }
}

/// Remove every named lock file of a data source.
///
/// Only meaningful when no other process is using the store.
pub fn clear_locks(root: &Path, data_source: &str) -> VfsResult<()> {
    let dir = lock_dir(root, data_source);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {
            warn!(dir = %dir.display(), "cleared lock directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VfsError::Io { path: dir, source: e }),
    }
}

/// Liveness marker of an open session.
///
/// The owning process holds the lock for the whole session; anyone who can
/// take it knows the owner is gone.
#[derive(Debug, Clone)]
pub struct SessionLiveness {
    lock: NamedLock,
}

impl SessionLiveness {
    pub fn new(root: &Path, data_source: &str, session: SessionId) -> Self {
        Self {
            lock: NamedLock::new(root, data_source, &format!("session-{}", session.get())),
        }
    }

    /// Claim the marker for the current process.
    pub fn hold(&self) -> VfsResult<LockGuard> {
        self.lock.try_lock()?.ok_or_else(|| VfsError::LockTimeout {
            path: self.lock.path().to_path_buf(),
            waited: Duration::ZERO,
        })
    }

    /// Whether some live holder still owns the marker.
    pub fn is_held(&self) -> VfsResult<bool> {
        Ok(self.lock.try_lock()?.is_none())
    }

    /// Delete the marker file. Best effort.
    pub fn discard(&self) {
        if let Err(e) = fs::remove_file(self.lock.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.lock.path().display(), error = %e, "failed to remove liveness marker");
            }
        }
    }
}
