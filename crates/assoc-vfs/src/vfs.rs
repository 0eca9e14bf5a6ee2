use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use assoc_types::SessionId;
use tracing::{debug, warn};

use crate::error::{VfsError, VfsResult};
use crate::lock::FileLock;
use crate::transaction::Transaction;

pub const BLOBS_DIR: &str = "blobs";
pub const TEMP_DIR: &str = "temp";

/// The blob content tree under a store root.
///
/// ```text
/// <root>/blobs/<file-uuid>/<blob-name>   durable content
/// <root>/temp/<name>                     staged writes and backups
/// <root>/lock                            guards temp name allocation
/// ```
#[derive(Debug, Clone)]
pub struct Vfs {
    root: PathBuf,
    blobs: PathBuf,
    temp: PathBuf,
    file_lock: FileLock,
    max_wait: Option<Duration>,
}

impl Vfs {
    /// Open the tree at `root`, creating `blobs/` and `temp/` if needed.
    pub fn new(
        root: impl Into<PathBuf>,
        file_lock: FileLock,
        max_wait: Option<Duration>,
    ) -> VfsResult<Self> {
        let root = root.into();
        let blobs = root.join(BLOBS_DIR);
        let temp = root.join(TEMP_DIR);
        fs::create_dir_all(&blobs).map_err(VfsError::io(&blobs))?;
        fs::create_dir_all(&temp).map_err(VfsError::io(&temp))?;
        Ok(Self {
            root,
            blobs,
            temp,
            file_lock,
            max_wait,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs_dir(&self) -> &Path {
        &self.blobs
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    /// Durable location of a blob's content.
    pub fn content_path(&self, file_uuid: &str, blob_name: &str) -> PathBuf {
        self.blobs.join(file_uuid).join(blob_name)
    }

    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.temp.join(name)
    }

    /// Reserve a fresh temp name `<seed><n>` and create the empty file.
    pub fn allocate_temp(&self, seed: &str) -> VfsResult<String> {
        validate_name(seed)?;
        let _guard = self.file_lock.timed_lock(self.max_wait)?;
        for i in 0..=u32::MAX {
            let name = format!("{seed}{i}");
            let path = self.temp.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!(name, "allocated temp file");
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(VfsError::Io { path, source: e }),
            }
        }
        Err(VfsError::Allocation {
            seed: seed.to_string(),
        })
    }

    /// Copy durable content into an allocated temp file.
    pub fn stage_copy(&self, src: &Path, temp_name: &str) -> VfsResult<()> {
        let dest = self.temp_path(temp_name);
        fs::copy(src, &dest).map_err(VfsError::io(src))?;
        Ok(())
    }

    /// Delete a temp file; a missing file is not an error.
    pub fn discard_temp(&self, name: &str) -> VfsResult<()> {
        let path = self.temp_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VfsError::Io { path, source: e }),
        }
    }

    /// Start a filesystem transaction on behalf of `session`.
    pub fn begin(&self, session: SessionId) -> Transaction<'_> {
        Transaction::new(self, backup_seed(session))
    }

    /// Delete backups left behind by `session`. Returns how many were removed.
    pub fn discard_backups(&self, session: SessionId) -> VfsResult<usize> {
        let seed = backup_seed(session);
        let mut removed = 0;
        let entries = fs::read_dir(&self.temp).map_err(VfsError::io(&self.temp))?;
        for entry in entries {
            let entry = entry.map_err(VfsError::io(&self.temp))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_backup_of(name, &seed) {
                self.discard_temp(name)?;
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(session = %session, removed, "discarded leftover backups");
        }
        Ok(removed)
    }

    /// Sessions that own at least one backup in the temp area.
    pub fn backup_sessions(&self) -> VfsResult<BTreeSet<SessionId>> {
        let mut owners = BTreeSet::new();
        let entries = fs::read_dir(&self.temp).map_err(VfsError::io(&self.temp))?;
        for entry in entries {
            let entry = entry.map_err(VfsError::io(&self.temp))?;
            if let Some(owner) = entry.file_name().to_str().and_then(backup_owner) {
                owners.insert(owner);
            }
        }
        Ok(owners)
    }
}

/// Prefix of backup names created by a session's transactions.
pub fn backup_seed(session: SessionId) -> String {
    format!("bak-{}-", session.get())
}

/// The session a `bak-<id>-<n>` name belongs to.
fn backup_owner(name: &str) -> Option<SessionId> {
    let (id, _) = name.strip_prefix("bak-")?.split_once('-')?;
    let owner = SessionId::new(id.parse().ok()?);
    is_backup_of(name, &backup_seed(owner)).then_some(owner)
}

fn is_backup_of(name: &str, seed: &str) -> bool {
    name.strip_prefix(seed)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Reject names that are empty or would leave their directory.
pub fn validate_name(name: &str) -> VfsResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        Err(VfsError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vfs(dir: &Path) -> Vfs {
        Vfs::new(dir, FileLock::new(dir.join("lock")), Some(Duration::from_secs(1))).unwrap()
    }

    #[test]
    fn creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let v = vfs(dir.path());
        assert!(v.blobs_dir().is_dir());
        assert!(v.temp_dir().is_dir());
        assert_eq!(
            v.content_path("u", "data"),
            dir.path().join("blobs").join("u").join("data")
        );
    }

    #[test]
    fn allocation_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let v = vfs(dir.path());
        assert_eq!(v.allocate_temp("seed").unwrap(), "seed0");
        assert_eq!(v.allocate_temp("seed").unwrap(), "seed1");
        v.discard_temp("seed0").unwrap();
        assert_eq!(v.allocate_temp("seed").unwrap(), "seed0");
        assert!(v.temp_path("seed1").exists());
    }

    #[test]
    fn allocation_rejects_path_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let v = vfs(dir.path());
        assert!(matches!(v.allocate_temp("../x"), Err(VfsError::InvalidName(_))));
    }

    #[test]
    fn allocation_times_out_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let v = Vfs::new(
            dir.path(),
            FileLock::new(dir.path().join("lock")),
            Some(Duration::from_millis(10)),
        )
        .unwrap();
        let _held = FileLock::new(dir.path().join("lock")).lock().unwrap();
        assert!(matches!(v.allocate_temp("s"), Err(VfsError::LockTimeout { .. })));
    }

    #[test]
    fn stage_copy_duplicates_content() {
        let dir = tempfile::tempdir().unwrap();
        let v = vfs(dir.path());
        let src = dir.path().join("src");
        fs::write(&src, b"payload").unwrap();
        let name = v.allocate_temp("c").unwrap();
        v.stage_copy(&src, &name).unwrap();
        assert_eq!(fs::read(v.temp_path(&name)).unwrap(), b"payload");
    }

    #[test]
    fn discards_only_own_backups() {
        let dir = tempfile::tempdir().unwrap();
        let v = vfs(dir.path());
        let s1 = SessionId::new(1);
        let s12 = SessionId::new(12);
        v.allocate_temp(&backup_seed(s1)).unwrap();
        v.allocate_temp(&backup_seed(s1)).unwrap();
        v.allocate_temp(&backup_seed(s12)).unwrap();
        v.allocate_temp("other").unwrap();

        assert_eq!(v.discard_backups(s1).unwrap(), 2);
        assert!(v.temp_path("bak-12-0").exists());
        assert!(v.temp_path("other0").exists());
    }

    #[test]
    fn backup_owners_are_parsed_from_names() {
        let dir = tempfile::tempdir().unwrap();
        let v = vfs(dir.path());
        v.allocate_temp(&backup_seed(SessionId::new(3))).unwrap();
        v.allocate_temp(&backup_seed(SessionId::new(3))).unwrap();
        v.allocate_temp(&backup_seed(SessionId::new(40))).unwrap();
        for decoy in ["bak-x-0", "bak-5-", "bak-5-1a", "u-0"] {
            fs::write(v.temp_path(decoy), b"").unwrap();
        }

        let owners: Vec<u64> = v.backup_sessions().unwrap().into_iter().map(|s| s.get()).collect();
        assert_eq!(owners, vec![3, 40]);
    }

    #[test]
    fn name_validation() {
        for good in ["default", "a.b", "x-1"] {
            assert!(validate_name(good).is_ok(), "{good}");
        }
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(validate_name(bad).is_err(), "{bad}");
        }
    }
}
