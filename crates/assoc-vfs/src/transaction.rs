use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{VfsError, VfsResult};
use crate::vfs::Vfs;

#[derive(Debug)]
enum Step {
    Move {
        src: PathBuf,
        dest: PathBuf,
        backup: Option<PathBuf>,
    },
    Remove {
        target: PathBuf,
        backup: Option<PathBuf>,
    },
}

/// An ordered batch of reversible filesystem changes.
///
/// Each change is applied as soon as it is added. Anything a change would
/// overwrite or delete is first renamed to a backup in the temp area, so
/// the batch can be undone with [`rollback`](Self::rollback) until
/// [`finish`](Self::finish) discards the backups. Dropping an unfinished
/// transaction rolls it back.
#[derive(Debug)]
pub struct Transaction<'a> {
    vfs: &'a Vfs,
    backup_seed: String,
    steps: Vec<Step>,
    done: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(vfs: &'a Vfs, backup_seed: String) -> Self {
        Self {
            vfs,
            backup_seed,
            steps: Vec::new(),
            done: false,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn back_up(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        if !exists(path)? {
            return Ok(None);
        }
        let backup = self.vfs.temp_path(&self.vfs.allocate_temp(&self.backup_seed)?);
        fs::rename(path, &backup).map_err(VfsError::io(path))?;
        Ok(Some(backup))
    }

    /// Move `src` to `dest`, backing up whatever `dest` held.
    pub fn move_into(&mut self, src: &Path, dest: &Path) -> VfsResult<()> {
        let backup = self.back_up(dest)?;
        let result = dest
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::rename(src, dest));
        if let Err(e) = result {
            if let Some(backup) = &backup {
                restore(backup, dest);
            }
            return Err(VfsError::Io {
                path: src.to_path_buf(),
                source: e,
            });
        }
        debug!(src = %src.display(), dest = %dest.display(), "moved");
        self.steps.push(Step::Move {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            backup,
        });
        Ok(())
    }

    /// Remove `target` by moving it to a backup. Absent targets are a no-op.
    pub fn remove(&mut self, target: &Path) -> VfsResult<()> {
        let backup = self.back_up(target)?;
        debug!(target = %target.display(), existed = backup.is_some(), "removed");
        self.steps.push(Step::Remove {
            target: target.to_path_buf(),
            backup,
        });
        Ok(())
    }

    /// Make every change permanent by deleting the backups.
    pub fn finish(mut self) -> VfsResult<()> {
        self.done = true;
        for step in self.steps.drain(..) {
            let backup = match step {
                Step::Move { backup, .. } | Step::Remove { backup, .. } => backup,
            };
            if let Some(backup) = backup {
                match fs::remove_file(&backup) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(VfsError::Io { path: backup, source: e }),
                }
            }
        }
        Ok(())
    }

    /// Undo every change, newest first.
    pub fn rollback(mut self) -> VfsResult<()> {
        self.undo()
    }

    fn undo(&mut self) -> VfsResult<()> {
        self.done = true;
        while let Some(step) = self.steps.pop() {
            match step {
                Step::Move { src, dest, backup } => {
                    fs::rename(&dest, &src).map_err(VfsError::io(&dest))?;
                    if let Some(backup) = backup {
                        fs::rename(&backup, &dest).map_err(VfsError::io(&backup))?;
                    }
                }
                Step::Remove { target, backup } => {
                    if let Some(backup) = backup {
                        fs::rename(&backup, &target).map_err(VfsError::io(&backup))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done && !self.steps.is_empty() {
            warn!(steps = self.steps.len(), "unfinished filesystem transaction, rolling back");
            if let Err(e) = self.undo() {
                warn!(error = %e, "filesystem rollback failed");
            }
        }
    }
}

fn exists(path: &Path) -> VfsResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(VfsError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn restore(backup: &Path, original: &Path) {
    if let Err(e) = fs::rename(backup, original) {
        warn!(backup = %backup.display(), error = %e, "failed to restore backup");
    }
}
