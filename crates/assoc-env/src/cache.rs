//! Per-session arena of opened files and blobs.
//!
//! Entries live exactly as long as the session. Each one corresponds to a
//! handle row, so other sessions can see what this session is using.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use assoc_types::SessionId;

use crate::error::{EnvError, EnvResult};
use crate::objects::{BlobRef, FileRef, Triple};

#[derive(Debug)]
pub(crate) struct FileEntry {
    pub id: u64,
    pub uuid: String,
    pub removed: bool,
    pub blobs: BTreeMap<String, BlobRef>,
}

#[derive(Debug)]
pub(crate) struct BlobEntry {
    pub id: u64,
    pub file: FileRef,
    pub name: String,
    pub content_type: String,
    pub removed: bool,
    pub added_triples: Vec<Triple>,
    pub removed_triples: BTreeSet<u64>,
}

#[derive(Debug)]
pub(crate) struct SessionCache {
    session: SessionId,
    files: Vec<FileEntry>,
    by_uuid: HashMap<String, FileRef>,
    blobs: Vec<BlobEntry>,
    /// Temp names of blobs whose content this session has staged.
    staged: HashMap<u64, String>,
}

impl SessionCache {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            files: Vec::new(),
            by_uuid: HashMap::new(),
            blobs: Vec::new(),
            staged: HashMap::new(),
        }
    }

    fn check(&self, session: SessionId) -> EnvResult<()> {
        if session == self.session {
            Ok(())
        } else {
            Err(EnvError::StaleReference(session))
        }
    }

    pub fn find_file(&self, uuid: &str) -> Option<FileRef> {
        self.by_uuid.get(uuid).copied()
    }

    pub fn file(&self, file: FileRef) -> EnvResult<&FileEntry> {
        self.check(file.session)?;
        self.files
            .get(file.index)
            .ok_or(EnvError::StaleReference(file.session))
    }

    pub fn file_mut(&mut self, file: FileRef) -> EnvResult<&mut FileEntry> {
        self.check(file.session)?;
        self.files
            .get_mut(file.index)
            .ok_or(EnvError::StaleReference(file.session))
    }

    pub fn blob(&self, blob: BlobRef) -> EnvResult<&BlobEntry> {
        self.check(blob.session)?;
        self.blobs
            .get(blob.index)
            .ok_or(EnvError::StaleReference(blob.session))
    }

    pub fn blob_mut(&mut self, blob: BlobRef) -> EnvResult<&mut BlobEntry> {
        self.check(blob.session)?;
        self.blobs
            .get_mut(blob.index)
            .ok_or(EnvError::StaleReference(blob.session))
    }

    pub fn insert_file(&mut self, id: u64, uuid: String) -> FileRef {
        let file = FileRef {
            session: self.session,
            index: self.files.len(),
        };
        self.by_uuid.insert(uuid.clone(), file);
        self.files.push(FileEntry {
            id,
            uuid,
            removed: false,
            blobs: BTreeMap::new(),
        });
        file
    }

    pub fn insert_blob(
        &mut self,
        file: FileRef,
        id: u64,
        name: String,
        content_type: String,
    ) -> EnvResult<BlobRef> {
        let blob = BlobRef {
            session: self.session,
            index: self.blobs.len(),
        };
        self.file_mut(file)?.blobs.insert(name.clone(), blob);
        self.blobs.push(BlobEntry {
            id,
            file,
            name,
            content_type,
            removed: false,
            added_triples: Vec::new(),
            removed_triples: BTreeSet::new(),
        });
        Ok(blob)
    }

    /// The cached blob of `file` named `name`, if opened this session.
    pub fn file_blob(&self, file: FileRef, name: &str) -> EnvResult<Option<BlobRef>> {
        Ok(self.file(file)?.blobs.get(name).copied())
    }

    pub fn staged(&self, blob_id: u64) -> Option<&str> {
        self.staged.get(&blob_id).map(String::as_str)
    }

    pub fn set_staged(&mut self, blob_id: u64, temp: String) {
        self.staged.insert(blob_id, temp);
    }

    /// Number of opened files and blobs.
    pub fn len(&self) -> usize {
        self.files.len() + self.blobs.len()
    }
}
