use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assoc_db::{
    handles, journal, sessions, sql_params, Connection, ProviderRegistry, QueryResult, Row,
};
use assoc_isolation::{IsolationLevel, IsolationRegistry};
use assoc_types::{
    Operation, Relation, SessionId, SessionState, BLOB_TYPE_ID, BLOB_TYPE_NAME, SYSTEM_PREFIX_ID,
    SYSTEM_PREFIX_NAME, SYSTEM_PREFIX_URI,
};
use assoc_vfs::{validate_name, FileLock, LockGuard, NamedLock, SessionLiveness, Vfs};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{BlobEntry, SessionCache};
use crate::check::{self, CheckReport};
use crate::config::StoreConfig;
use crate::error::{CommitError, CommitReason, EnvError, EnvResult};
use crate::objects::{BlobRef, FileRef, ObjectType, Prefix, Subject, Triple};
use crate::publish;
use crate::recovery::{self, RecoveryReport};

/// Name of the lock serializing session start, commit and recovery.
pub const COMMIT_LOCK: &str = "session";

/// Name of the file guarding temp name allocation, relative to the root.
pub const TEMP_LOCK_FILE: &str = "lock";

struct ActiveSession {
    id: SessionId,
    cache: SessionCache,
    liveness: SessionLiveness,
    liveness_guard: LockGuard,
}

/// One process's view of an associative store.
///
/// Serves at most one session at a time. All reads and writes go through
/// the session; nothing a session does is visible to others until
/// [`Environment::commit_session`] succeeds.
pub struct Environment {
    data_source: String,
    conn: Box<dyn Connection>,
    vfs: Vfs,
    isolation: Arc<IsolationRegistry>,
    commit_lock: NamedLock,
    max_wait: Option<Duration>,
    default_isolation: String,
    startup: RecoveryReport,
    session: Option<ActiveSession>,
}

impl Environment {
    /// Open the store described by `config` with the built-in providers and
    /// isolation levels, reconciling sessions left by dead processes.
    pub fn open(config: &StoreConfig) -> EnvResult<Self> {
        Self::open_with(
            config,
            &ProviderRegistry::with_defaults(),
            IsolationRegistry::with_defaults(),
        )
    }

    pub fn open_with(
        config: &StoreConfig,
        providers: &ProviderRegistry,
        isolation: IsolationRegistry,
    ) -> EnvResult<Self> {
        let root = config.root.clone();
        fs::create_dir_all(&root).map_err(EnvError::io(&root))?;
        isolation.get(&config.default_isolation)?;

        let data_source = config.resolved_data_source();
        if config.clear_locks {
            assoc_vfs::clear_locks(&root, &data_source)?;
        }
        let conn = providers.connect(&data_source)?;
        let max_wait = config.max_lock_wait();
        let vfs = Vfs::new(&root, FileLock::new(root.join(TEMP_LOCK_FILE)), max_wait)?;
        let commit_lock = NamedLock::new(&root, &data_source, COMMIT_LOCK);

        let mut env = Self {
            data_source,
            conn,
            vfs,
            isolation: Arc::new(isolation),
            commit_lock,
            max_wait,
            default_isolation: config.default_isolation.clone(),
            startup: RecoveryReport::default(),
            session: None,
        };
        env.startup = env.recover()?;
        debug!(root = %root.display(), data_source = %env.data_source, "environment open");
        Ok(env)
    }

    pub fn root(&self) -> &Path {
        self.vfs.root()
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn default_isolation(&self) -> &str {
        &self.default_isolation
    }

    pub fn isolation_levels(&self) -> &IsolationRegistry {
        &self.isolation
    }

    /// What reconciliation did while opening.
    pub fn startup_report(&self) -> &RecoveryReport {
        &self.startup
    }

    /// The session in progress, if any.
    pub fn session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    fn active(&self) -> EnvResult<&ActiveSession> {
        self.session.as_ref().ok_or(EnvError::NoSession)
    }

    fn parts(&mut self) -> EnvResult<(&dyn Connection, &Vfs, &mut ActiveSession)> {
        let active = self.session.as_mut().ok_or(EnvError::NoSession)?;
        Ok((self.conn.as_ref(), &self.vfs, active))
    }

    // ---- Session lifecycle ----

    pub fn start_session(&mut self) -> EnvResult<SessionId> {
        if let Some(active) = &self.session {
            return Err(EnvError::SessionActive(active.id));
        }
        // Recovery must never see a session row without its liveness lock.
        let _commit = self.commit_lock.timed_lock(self.max_wait)?;
        let id = sessions::create(self.conn.as_ref(), std::process::id())?;
        let liveness = SessionLiveness::new(self.vfs.root(), &self.data_source, id);
        let liveness_guard = match liveness.hold() {
            Ok(guard) => guard,
            Err(e) => {
                sessions::delete(self.conn.as_ref(), id)?;
                return Err(e.into());
            }
        };
        info!(session = %id, "session started");
        self.session = Some(ActiveSession {
            id,
            cache: SessionCache::new(id),
            liveness,
            liveness_guard,
        });
        Ok(id)
    }

    /// Commit under the configured default isolation level.
    pub fn commit(&mut self) -> EnvResult<()> {
        let level = self.default_isolation.clone();
        self.commit_session(&level)
    }

    /// Commit under the named isolation level.
    ///
    /// A refused commit returns [`EnvError::Commit`] and leaves the session
    /// open with its journal intact.
    pub fn commit_session(&mut self, level: &str) -> EnvResult<()> {
        let isolation = Arc::clone(&self.isolation);
        let level = isolation.get(level)?;
        self.commit_with(level)
    }

    pub fn commit_with(&mut self, level: &dyn IsolationLevel) -> EnvResult<()> {
        let session = self.active()?.id;
        let _commit = self.commit_lock.timed_lock(self.max_wait)?;
        self.validate(session, level)?;
        self.publish(session)?;
        self.end_session();
        info!(session = %session, level = level.name(), "session committed");
        Ok(())
    }

    /// Mark the session ready, run the isolation and invalidation checks and
    /// record the outcome durably.
    fn validate(&self, session: SessionId, level: &dyn IsolationLevel) -> EnvResult<()> {
        let conn = self.conn.as_ref();
        let tx = conn.transaction()?;
        sessions::set_state(conn, session, SessionState::Ready)?;
        let conflicts = level.conflicts(conn, session)?;
        let reason = if !conflicts.is_empty() {
            Some(CommitReason::ConflictingHandles)
        } else if publish::is_invalidated(conn, session)? {
            Some(CommitReason::Invalidated)
        } else {
            sessions::set_state(conn, session, SessionState::Validated)?;
            None
        };
        tx.commit()?;

        if let Some(reason) = reason {
            warn!(
                session = %session,
                level = level.name(),
                reason = %reason,
                conflicts = conflicts.len(),
                "commit refused"
            );
            return Err(CommitError {
                session,
                level: level.name().to_string(),
                reason,
                conflicts,
            }
            .into());
        }
        debug!(session = %session, level = level.name(), "commit validated");
        Ok(())
    }

    /// Replay the filesystem journal, then publish the row changes. Either
    /// failure undoes the filesystem steps and leaves the session open.
    fn publish(&self, session: SessionId) -> EnvResult<()> {
        let conn = self.conn.as_ref();
        let removed = publish::removed_files(conn, session)?;
        let tx = match publish::replay_vfs(conn, &self.vfs, session, false) {
            Ok(tx) => tx,
            Err(e) => {
                self.reopen_after_failed_publish(session);
                return Err(e);
            }
        };
        if let Err(e) = publish::publish_rows(conn, session) {
            if let Err(undo) = tx.rollback() {
                warn!(session = %session, error = %undo, "failed to undo filesystem changes");
            }
            self.reopen_after_failed_publish(session);
            return Err(e);
        }
        if let Err(e) = tx.finish() {
            warn!(session = %session, error = %e, "failed to drop backups");
        }
        publish::prune_dirs(&self.vfs, &removed);
        debug!(session = %session, "commit published");
        Ok(())
    }

    fn reopen_after_failed_publish(&self, session: SessionId) {
        let conn = self.conn.as_ref();
        let reset = journal::reset_executed(conn, session)
            .and_then(|_| sessions::set_state(conn, session, SessionState::Ready));
        if let Err(e) = reset {
            warn!(session = %session, error = %e, "failed to reset journal after aborted commit");
        }
    }

    /// Discard everything the session did.
    pub fn rollback_session(&mut self) -> EnvResult<()> {
        let session = self.active()?.id;
        let conn = self.conn.as_ref();
        let staged = journal::staged_targets(conn, session)?;
        publish::discard_rows(conn, session)?;
        publish::discard_staged(&self.vfs, session, &staged);
        self.end_session();
        info!(session = %session, "session rolled back");
        Ok(())
    }

    fn end_session(&mut self) {
        if let Some(ActiveSession {
            id,
            cache,
            liveness,
            liveness_guard,
        }) = self.session.take()
        {
            debug!(session = %id, cached = cache.len(), "released session objects");
            drop(liveness_guard);
            liveness.discard();
        }
    }

    /// Reconcile sessions of dead processes. Runs on open; safe to repeat.
    pub fn recover(&self) -> EnvResult<RecoveryReport> {
        let _commit = self.commit_lock.timed_lock(self.max_wait)?;
        recovery::recover(
            self.conn.as_ref(),
            &self.vfs,
            &self.data_source,
            self.session(),
        )
    }

    /// Compare the blob tree with the visible blob rows.
    pub fn check(&self) -> EnvResult<CheckReport> {
        check::check(self.conn.as_ref(), &self.vfs)
    }

    /// Run raw SQL against the backing store.
    pub fn query(&self, sql: &str) -> EnvResult<QueryResult> {
        Ok(self.conn.execute_query(sql)?)
    }

    // ---- File operations ----

    /// Create a new, still invisible file with a random uuid.
    pub fn create_file(&mut self) -> EnvResult<FileRef> {
        let (conn, _, active) = self.parts()?;
        let uuid = Uuid::new_v4().to_string();

        let tx = conn.transaction()?;
        let id = conn.next_id("file")?;
        conn.statement(
            "insert into file (id, uuid, visible, reserved) values (?1, ?2, 0, 0)",
            &sql_params![id, &uuid],
        )?;
        journal::record(conn, active.id, Relation::File, id, Operation::Add, None)?;
        conn.open_handle(Relation::File, id, active.id)?;
        tx.commit()?;

        debug!(session = %active.id, uuid = %uuid, "created file");
        Ok(active.cache.insert_file(id, uuid))
    }

    /// Open a committed file, or return the cached one.
    pub fn get_file(&mut self, uuid: &str) -> EnvResult<FileRef> {
        let (conn, _, active) = self.parts()?;
        if let Some(file) = active.cache.find_file(uuid) {
            if active.cache.file(file)?.removed {
                return Err(EnvError::NotFound(format!("file {uuid}")));
            }
            return Ok(file);
        }

        let rows = conn.query(
            "select id, visible from file where uuid = ?1",
            &sql_params![uuid],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| EnvError::NotFound(format!("file {uuid}")))?;
        if !row.get_bool(1)? {
            return Err(EnvError::NotFound(format!("file {uuid} (not visible yet)")));
        }
        let id = row.get_u64(0)?;
        conn.open_handle(Relation::File, id, active.id)?;
        Ok(active.cache.insert_file(id, uuid.to_string()))
    }

    pub fn file_uuid(&self, file: FileRef) -> EnvResult<&str> {
        Ok(self.active()?.cache.file(file)?.uuid.as_str())
    }

    /// Names of the file's blobs as this session sees them.
    pub fn blob_names(&self, file: FileRef) -> EnvResult<Vec<String>> {
        let active = self.active()?;
        let entry = active.cache.file(file)?;
        let rows = self.conn.query(
            "select name from blob where file_id = ?1 and visible = 1",
            &sql_params![entry.id],
        )?;
        let mut names = rows
            .iter()
            .map(|row| -> EnvResult<String> { Ok(row.get_str(0)?.to_string()) })
            .collect::<EnvResult<BTreeSet<String>>>()?;
        for (name, blob) in &entry.blobs {
            if active.cache.blob(*blob)?.removed {
                names.remove(name);
            } else {
                names.insert(name.clone());
            }
        }
        Ok(names.into_iter().collect())
    }

    pub fn has_blob(&self, file: FileRef, name: &str) -> EnvResult<bool> {
        Ok(self.blob_names(file)?.iter().any(|n| n == name))
    }

    pub fn get_blob(&mut self, file: FileRef, name: &str) -> EnvResult<BlobRef> {
        let (conn, _, active) = self.parts()?;
        let entry = active.cache.file(file)?;
        if entry.removed {
            return Err(EnvError::NotFound(format!("file {}", entry.uuid)));
        }
        if let Some(blob) = active.cache.file_blob(file, name)? {
            if active.cache.blob(blob)?.removed {
                return Err(EnvError::NotFound(format!("blob {name}")));
            }
            return Ok(blob);
        }

        let rows = conn.query(
            "select blob.id, content_type.mime from blob \
             join content_type on content_type.id = blob.content_type_id \
             where blob.file_id = ?1 and blob.name = ?2 and blob.visible = 1",
            &sql_params![entry.id, name],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| EnvError::NotFound(format!("blob {}:{name}", entry.uuid)))?;
        let id = row.get_u64(0)?;
        let content_type = row.get_str(1)?.to_string();
        conn.open_handle(Relation::Blob, id, active.id)?;
        active
            .cache
            .insert_blob(file, id, name.to_string(), content_type)
    }

    /// Add a blob named `name` to `file`. Names are unique per file across
    /// all sessions, committed or not.
    pub fn add_blob(&mut self, file: FileRef, name: &str, content_type: &str) -> EnvResult<BlobRef> {
        validate_name(name).map_err(|_| EnvError::InvalidArgument(format!("blob name '{name}'")))?;
        let (conn, _, active) = self.parts()?;
        let entry = active.cache.file(file)?;
        if entry.removed {
            return Err(EnvError::NotFound(format!("file {}", entry.uuid)));
        }
        let file_id = entry.id;

        let tx = conn.transaction()?;
        let existing = conn.query(
            "select id from blob where file_id = ?1 and name = ?2",
            &sql_params![file_id, name],
        )?;
        if !existing.is_empty() {
            return Err(EnvError::AlreadyExists(format!("blob {name}")));
        }
        let content_type_id = content_type_id(conn, content_type)?;
        let id = conn.next_id("blob")?;
        conn.statement(
            "insert into blob (id, file_id, name, content_type_id, visible) \
             values (?1, ?2, ?3, ?4, 0)",
            &sql_params![id, file_id, name, content_type_id],
        )?;
        journal::record(conn, active.id, Relation::Blob, id, Operation::Add, None)?;
        conn.open_handle(Relation::Blob, id, active.id)?;
        tx.commit()?;

        debug!(session = %active.id, blob = id, name, "added blob");
        active
            .cache
            .insert_blob(file, id, name.to_string(), content_type.to_string())
    }

    /// Schedule removal of a blob, its content and, at commit, every
    /// visible triple about it.
    pub fn remove_blob(&mut self, blob: BlobRef) -> EnvResult<()> {
        let (conn, _, active) = self.parts()?;
        let entry = active.cache.blob_mut(blob)?;
        if entry.removed {
            return Ok(());
        }
        journal::record(conn, active.id, Relation::Blob, entry.id, Operation::Remove, None)?;
        entry.removed = true;
        debug!(session = %active.id, blob = entry.id, "removed blob");
        Ok(())
    }

    /// Schedule removal of a file and all of its blobs.
    pub fn remove_file(&mut self, file: FileRef) -> EnvResult<()> {
        for name in self.blob_names(file)? {
            let blob = self.get_blob(file, &name)?;
            self.remove_blob(blob)?;
        }
        let (conn, _, active) = self.parts()?;
        let entry = active.cache.file_mut(file)?;
        if entry.removed {
            return Ok(());
        }
        journal::record(conn, active.id, Relation::File, entry.id, Operation::Remove, None)?;
        entry.removed = true;
        debug!(session = %active.id, uuid = %entry.uuid, "removed file");
        Ok(())
    }

    // ---- Blob operations ----

    pub fn blob_name(&self, blob: BlobRef) -> EnvResult<&str> {
        Ok(self.active()?.cache.blob(blob)?.name.as_str())
    }

    pub fn blob_content_type(&self, blob: BlobRef) -> EnvResult<&str> {
        Ok(self.active()?.cache.blob(blob)?.content_type.as_str())
    }

    pub fn blob_file(&self, blob: BlobRef) -> EnvResult<FileRef> {
        Ok(self.active()?.cache.blob(blob)?.file)
    }

    pub fn blob_id(&self, blob: BlobRef) -> EnvResult<u64> {
        Ok(self.active()?.cache.blob(blob)?.id)
    }

    /// Path to read or write the blob's content.
    ///
    /// Read access to content this session has not touched is the durable
    /// file itself. Write access stages a private copy on first use; later
    /// calls return the same staged file.
    pub fn blob_path(&mut self, blob: BlobRef, write: bool) -> EnvResult<PathBuf> {
        self.stage(blob, write, true)
    }

    /// Replace the blob's content.
    pub fn write_blob(&mut self, blob: BlobRef, bytes: &[u8]) -> EnvResult<()> {
        let path = self.stage(blob, true, false)?;
        fs::write(&path, bytes).map_err(EnvError::io(&path))
    }

    pub fn read_blob(&mut self, blob: BlobRef) -> EnvResult<Vec<u8>> {
        let path = self.stage(blob, false, true)?;
        fs::read(&path).map_err(EnvError::io(&path))
    }

    fn stage(&mut self, blob: BlobRef, write: bool, copy: bool) -> EnvResult<PathBuf> {
        let (conn, vfs, active) = self.parts()?;
        let entry = live_blob(&active.cache, blob)?;
        if let Some(temp) = active.cache.staged(entry.id) {
            return Ok(vfs.temp_path(temp));
        }
        let id = entry.id;
        let uuid = active.cache.file(entry.file)?.uuid.clone();
        let durable = vfs.content_path(&uuid, &entry.name);
        let exists = durable.is_file();
        if !write && exists {
            return Ok(durable);
        }

        let temp = vfs.allocate_temp(&format!("{uuid}-"))?;
        if copy && exists {
            vfs.stage_copy(&durable, &temp)?;
        }
        journal::record(conn, active.id, Relation::Blob, id, Operation::Store, Some(&temp))?;
        debug!(session = %active.id, blob = id, temp = %temp, "staged blob content");
        let path = vfs.temp_path(&temp);
        active.cache.set_staged(id, temp);
        Ok(path)
    }

    // ---- Metadata operations ----

    /// Triples about `blob` as this session sees them.
    pub fn triples(&self, blob: BlobRef) -> EnvResult<Vec<Triple>> {
        let active = self.active()?;
        let entry = live_blob(&active.cache, blob)?;
        let subject = subject(&active.cache, blob)?;
        let rows = self.conn.query(
            "select m.id, m.predicate, m.object, p.id, p.name, p.uri, \
                    t.id, t.name, tp.id, tp.name, tp.uri \
             from metadata m \
             join prefix p on p.id = m.predicate_prefix_id \
             join type t on t.id = m.object_type_id \
             join prefix tp on tp.id = t.prefix_id \
             where m.blob_id = ?1 and m.visible = 1 \
             order by m.id",
            &sql_params![entry.id],
        )?;
        let mut triples = Vec::with_capacity(rows.len() + entry.added_triples.len());
        for row in &rows {
            let triple = decode_triple(row, &subject)?;
            if !entry.removed_triples.contains(&triple.id) {
                triples.push(triple);
            }
        }
        triples.extend(entry.added_triples.iter().cloned());
        Ok(triples)
    }

    /// Attach a literal-valued triple to `subject`.
    pub fn add_triple(
        &mut self,
        subject: BlobRef,
        prefix: &Prefix,
        predicate: &str,
        object_type: &ObjectType,
        object: &str,
    ) -> EnvResult<Triple> {
        if object_type.is_blob() {
            return Err(EnvError::InvalidArgument(
                "blob-typed objects are added with add_blob_triple".to_string(),
            ));
        }
        self.insert_triple(subject, prefix, predicate, object_type.clone(), object.to_string())
    }

    /// Attach a triple whose object is another blob.
    pub fn add_blob_triple(
        &mut self,
        subject: BlobRef,
        prefix: &Prefix,
        predicate: &str,
        object: BlobRef,
    ) -> EnvResult<Triple> {
        let object_id = live_blob(&self.active()?.cache, object)?.id;
        self.insert_triple(subject, prefix, predicate, blob_type(), object_id.to_string())
    }

    fn insert_triple(
        &mut self,
        blob: BlobRef,
        prefix: &Prefix,
        predicate: &str,
        object_type: ObjectType,
        object: String,
    ) -> EnvResult<Triple> {
        if predicate.is_empty() {
            return Err(EnvError::InvalidArgument("empty predicate".to_string()));
        }
        let (conn, _, active) = self.parts()?;
        let subject = subject(&active.cache, blob)?;
        live_blob(&active.cache, blob)?;

        let tx = conn.transaction()?;
        let id = conn.next_id("metadata")?;
        conn.statement(
            "insert into metadata \
             (id, blob_id, predicate_prefix_id, predicate, object_type_id, object, visible) \
             values (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            &sql_params![id, subject.blob_id, prefix.id, predicate, object_type.id, &object],
        )?;
        journal::record(conn, active.id, Relation::Metadata, id, Operation::Add, None)?;
        tx.commit()?;

        let triple = Triple {
            id,
            subject,
            predicate_prefix: prefix.clone(),
            predicate: predicate.to_string(),
            object_type,
            object,
        };
        debug!(session = %active.id, triple = %triple, "added triple");
        active.cache.blob_mut(blob)?.added_triples.push(triple.clone());
        Ok(triple)
    }

    /// Schedule removal of one triple about `subject`.
    pub fn remove_triple(&mut self, subject: BlobRef, triple: u64) -> EnvResult<()> {
        let (conn, _, active) = self.parts()?;
        let entry = live_blob(&active.cache, subject)?;
        let added = entry.added_triples.iter().position(|t| t.id == triple);
        if added.is_none() {
            let rows = conn.query(
                "select id from metadata where id = ?1 and blob_id = ?2 and visible = 1",
                &sql_params![triple, entry.id],
            )?;
            if rows.is_empty() || entry.removed_triples.contains(&triple) {
                return Err(EnvError::NotFound(format!("triple {triple}")));
            }
        }
        journal::record(conn, active.id, Relation::Metadata, triple, Operation::Remove, None)?;
        let entry = active.cache.blob_mut(subject)?;
        match added {
            Some(index) => {
                entry.added_triples.remove(index);
            }
            None => {
                entry.removed_triples.insert(triple);
            }
        }
        debug!(session = %active.id, triple, "removed triple");
        Ok(())
    }

    // ---- Prefix and type operations ----

    /// Look up a prefix by name, creating it when `uri` is given.
    ///
    /// An existing prefix bound to a different URI is an error.
    pub fn prefix(&self, name: &str, uri: Option<&str>) -> EnvResult<Prefix> {
        if name.is_empty() {
            return Err(EnvError::InvalidArgument("empty prefix name".to_string()));
        }
        let conn = self.conn.as_ref();
        let tx = conn.transaction()?;
        let rows = conn.query(
            "select id, uri from prefix where name = ?1",
            &sql_params![name],
        )?;
        let prefix = match (rows.first(), uri) {
            (Some(row), wanted) => {
                let existing = row.get_str(1)?;
                if let Some(wanted) = wanted.filter(|w| *w != existing) {
                    return Err(EnvError::InvalidArgument(format!(
                        "prefix {name} is bound to <{existing}>, not <{wanted}>"
                    )));
                }
                Prefix {
                    id: row.get_u64(0)?,
                    name: name.to_string(),
                    uri: existing.to_string(),
                }
            }
            (None, None) => return Err(EnvError::NotFound(format!("prefix {name}"))),
            (None, Some(uri)) => {
                let id = conn.next_id("prefix")?;
                conn.statement(
                    "insert into prefix (id, name, uri) values (?1, ?2, ?3)",
                    &sql_params![id, name, uri],
                )?;
                info!(prefix = name, uri, "registered prefix");
                Prefix {
                    id,
                    name: name.to_string(),
                    uri: uri.to_string(),
                }
            }
        };
        tx.commit()?;
        Ok(prefix)
    }

    /// Look up or create the type `name` in `prefix`.
    pub fn object_type(&self, name: &str, prefix: &Prefix) -> EnvResult<ObjectType> {
        if name.is_empty() {
            return Err(EnvError::InvalidArgument("empty type name".to_string()));
        }
        let conn = self.conn.as_ref();
        let tx = conn.transaction()?;
        let rows = conn.query(
            "select id from type where prefix_id = ?1 and name = ?2",
            &sql_params![prefix.id, name],
        )?;
        let id = match rows.first() {
            Some(row) => row.get_u64(0)?,
            None => {
                let id = conn.next_id("type")?;
                conn.statement(
                    "insert into type (id, prefix_id, name) values (?1, ?2, ?3)",
                    &sql_params![id, prefix.id, name],
                )?;
                info!(prefix = %prefix.name, name, "registered type");
                id
            }
        };
        tx.commit()?;
        Ok(ObjectType {
            id,
            prefix: prefix.clone(),
            name: name.to_string(),
        })
    }

    /// The reserved type of blob-valued objects.
    pub fn blob_type(&self) -> ObjectType {
        blob_type()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Some(active) = &self.session {
            warn!(
                session = %active.id,
                "environment dropped with a session in progress; it is rolled back on next open"
            );
            if let Err(e) = handles::close_session_handles(self.conn.as_ref(), active.id) {
                warn!(session = %active.id, error = %e, "failed to close handles");
            }
        }
    }
}

fn live_blob(cache: &SessionCache, blob: BlobRef) -> EnvResult<&BlobEntry> {
    let entry = cache.blob(blob)?;
    if entry.removed {
        return Err(EnvError::NotFound(format!("blob {} (removed)", entry.name)));
    }
    Ok(entry)
}

fn subject(cache: &SessionCache, blob: BlobRef) -> EnvResult<Subject> {
    let entry = cache.blob(blob)?;
    Ok(Subject {
        blob_id: entry.id,
        file_uuid: cache.file(entry.file)?.uuid.clone(),
        blob_name: entry.name.clone(),
    })
}

fn system_prefix() -> Prefix {
    Prefix {
        id: SYSTEM_PREFIX_ID,
        name: SYSTEM_PREFIX_NAME.to_string(),
        uri: SYSTEM_PREFIX_URI.to_string(),
    }
}

fn blob_type() -> ObjectType {
    ObjectType {
        id: BLOB_TYPE_ID,
        prefix: system_prefix(),
        name: BLOB_TYPE_NAME.to_string(),
    }
}

fn content_type_id(conn: &dyn Connection, mime: &str) -> EnvResult<u64> {
    let rows = conn.query(
        "select id from content_type where mime = ?1",
        &sql_params![mime],
    )?;
    if let Some(row) = rows.first() {
        return Ok(row.get_u64(0)?);
    }
    let id = conn.next_id("content_type")?;
    conn.statement(
        "insert into content_type (id, mime) values (?1, ?2)",
        &sql_params![id, mime],
    )?;
    Ok(id)
}

fn decode_triple(row: &Row, subject: &Subject) -> EnvResult<Triple> {
    Ok(Triple {
        id: row.get_u64(0)?,
        subject: subject.clone(),
        predicate: row.get_str(1)?.to_string(),
        object: row.get_str(2)?.to_string(),
        predicate_prefix: Prefix {
            id: row.get_u64(3)?,
            name: row.get_str(4)?.to_string(),
            uri: row.get_str(5)?.to_string(),
        },
        object_type: ObjectType {
            id: row.get_u64(6)?,
            name: row.get_str(7)?.to_string(),
            prefix: Prefix {
                id: row.get_u64(8)?,
                name: row.get_str(9)?.to_string(),
                uri: row.get_str(10)?.to_string(),
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assoc_isolation::Full;

    fn memory_env(dir: &Path) -> Environment {
        let config = StoreConfig {
            data_source: Some("memory:".into()),
            ..StoreConfig::at(dir)
        };
        Environment::open(&config).unwrap()
    }

    // ---- Session state ----

    #[test]
    fn operations_need_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        assert!(matches!(env.create_file(), Err(EnvError::NoSession)));
        assert!(matches!(env.get_file("x"), Err(EnvError::NoSession)));
        assert!(matches!(env.commit(), Err(EnvError::NoSession)));
        assert!(matches!(env.rollback_session(), Err(EnvError::NoSession)));
    }

    #[test]
    fn one_session_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        let id = env.start_session().unwrap();
        assert!(matches!(env.start_session(), Err(EnvError::SessionActive(s)) if s == id));
        env.rollback_session().unwrap();
        assert!(matches!(env.rollback_session(), Err(EnvError::NoSession)));
        assert_ne!(env.start_session().unwrap(), id);
    }

    #[test]
    fn references_expire_with_their_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        env.commit_session("full").unwrap();

        env.start_session().unwrap();
        assert!(matches!(env.file_uuid(f), Err(EnvError::StaleReference(_))));
    }

    #[test]
    fn unknown_isolation_level_keeps_session_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        let id = env.start_session().unwrap();
        assert!(matches!(
            env.commit_session("serializable"),
            Err(EnvError::Isolation(_))
        ));
        assert_eq!(env.session(), Some(id));
    }

    // ---- Files and blobs ----

    #[test]
    fn read_your_writes_within_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        let uuid = env.file_uuid(f).unwrap().to_string();
        assert_eq!(env.get_file(&uuid).unwrap(), f);

        let b = env.add_blob(f, "default", "text/plain").unwrap();
        assert_eq!(env.get_blob(f, "default").unwrap(), b);
        assert_eq!(env.blob_names(f).unwrap(), vec!["default"]);
        assert!(env.has_blob(f, "default").unwrap());
        assert_eq!(env.blob_content_type(b).unwrap(), "text/plain");

        env.write_blob(b, b"draft").unwrap();
        assert_eq!(env.read_blob(b).unwrap(), b"draft");
    }

    #[test]
    fn blob_names_are_unique_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        env.add_blob(f, "default", "text/plain").unwrap();
        assert!(matches!(
            env.add_blob(f, "default", "text/plain"),
            Err(EnvError::AlreadyExists(_))
        ));
        assert!(matches!(
            env.add_blob(f, "../escape", "text/plain"),
            Err(EnvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn staging_happens_once_per_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        let b = env.add_blob(f, "default", "text/plain").unwrap();

        let first = env.blob_path(b, true).unwrap();
        let second = env.blob_path(b, true).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(dir.path().join("temp")));
        let stores = env
            .query("select count(*) from journal where operation = 2")
            .unwrap();
        assert_eq!(stores.rows[0].get_u64(0).unwrap(), 1);
    }

    #[test]
    fn committed_content_is_read_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        let uuid = env.file_uuid(f).unwrap().to_string();
        let b = env.add_blob(f, "default", "text/plain").unwrap();
        env.write_blob(b, b"v1").unwrap();
        env.commit_session("full").unwrap();

        env.start_session().unwrap();
        let f = env.get_file(&uuid).unwrap();
        let b = env.get_blob(f, "default").unwrap();
        let durable = dir.path().join("blobs").join(&uuid).join("default");
        assert_eq!(env.blob_path(b, false).unwrap(), durable);

        let staged = env.blob_path(b, true).unwrap();
        assert_ne!(staged, durable);
        assert_eq!(fs::read(&staged).unwrap(), b"v1");
        fs::write(&staged, b"v2").unwrap();
        env.commit_session("full").unwrap();
        assert_eq!(fs::read(&durable).unwrap(), b"v2");
    }

    #[test]
    fn removed_blob_is_gone_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        let uuid = env.file_uuid(f).unwrap().to_string();
        let b = env.add_blob(f, "default", "text/plain").unwrap();
        env.write_blob(b, b"bytes").unwrap();
        env.add_blob(f, "keep", "text/plain").unwrap();
        env.commit_session("full").unwrap();

        env.start_session().unwrap();
        let f = env.get_file(&uuid).unwrap();
        let b = env.get_blob(f, "default").unwrap();
        env.remove_blob(b).unwrap();
        assert_eq!(env.blob_names(f).unwrap(), vec!["keep"]);
        assert!(matches!(env.read_blob(b), Err(EnvError::NotFound(_))));
        env.commit_session("full").unwrap();

        assert!(!dir.path().join("blobs").join(&uuid).join("default").exists());
        env.start_session().unwrap();
        let f = env.get_file(&uuid).unwrap();
        assert!(matches!(env.get_blob(f, "default"), Err(EnvError::NotFound(_))));
    }

    #[test]
    fn removed_file_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let f = env.create_file().unwrap();
        let uuid = env.file_uuid(f).unwrap().to_string();
        let b = env.add_blob(f, "default", "text/plain").unwrap();
        env.write_blob(b, b"bytes").unwrap();
        env.commit_session("full").unwrap();

        env.start_session().unwrap();
        let f = env.get_file(&uuid).unwrap();
        env.remove_file(f).unwrap();
        env.commit_session("full").unwrap();

        assert!(!dir.path().join("blobs").join(&uuid).exists());
        env.start_session().unwrap();
        assert!(matches!(env.get_file(&uuid), Err(EnvError::NotFound(_))));
    }

    // ---- Metadata ----

    #[test]
    fn triples_follow_session_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let dc = env.prefix("dc", Some("http://purl.org/dc/terms/")).unwrap();
        let string = env.object_type("string", &dc).unwrap();
        let f = env.create_file().unwrap();
        let b = env.add_blob(f, "default", "text/plain").unwrap();

        let t = env.add_triple(b, &dc, "creator", &string, "alice").unwrap();
        assert_eq!(env.triples(b).unwrap(), vec![t.clone()]);
        env.remove_triple(b, t.id).unwrap();
        assert!(env.triples(b).unwrap().is_empty());
        assert!(matches!(env.remove_triple(b, t.id), Err(EnvError::NotFound(_))));
    }

    #[test]
    fn blob_type_is_reserved_for_blob_triples() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        env.start_session().unwrap();
        let dc = env.prefix("dc", Some("http://purl.org/dc/terms/")).unwrap();
        let f = env.create_file().unwrap();
        let a = env.add_blob(f, "a", "text/plain").unwrap();
        let b = env.add_blob(f, "b", "text/plain").unwrap();

        let blob_type = env.blob_type();
        assert!(matches!(
            env.add_triple(a, &dc, "source", &blob_type, "1"),
            Err(EnvError::InvalidArgument(_))
        ));
        let t = env.add_blob_triple(a, &dc, "source", b).unwrap();
        assert_eq!(t.object_blob(), Some(env.blob_id(b).unwrap()));
    }

    #[test]
    fn prefixes_are_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let env = memory_env(dir.path());
        assert!(matches!(env.prefix("dc", None), Err(EnvError::NotFound(_))));
        let dc = env.prefix("dc", Some("http://purl.org/dc/terms/")).unwrap();
        assert_eq!(env.prefix("dc", None).unwrap(), dc);
        assert!(matches!(
            env.prefix("dc", Some("urn:other:")),
            Err(EnvError::InvalidArgument(_))
        ));
        assert_eq!(env.prefix("sys", None).unwrap().id, SYSTEM_PREFIX_ID);

        let a = env.object_type("string", &dc).unwrap();
        assert_eq!(env.object_type("string", &dc).unwrap(), a);
        assert_ne!(a.id, BLOB_TYPE_ID);
    }

    // ---- Crash handling ----

    #[test]
    fn validated_session_is_rolled_forward_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::at(dir.path());
        let uuid = {
            let mut env = Environment::open(&config).unwrap();
            let session = env.start_session().unwrap();
            let f = env.create_file().unwrap();
            let b = env.add_blob(f, "default", "text/plain").unwrap();
            env.write_blob(b, b"survives").unwrap();
            env.validate(session, &Full).unwrap();
            env.file_uuid(f).unwrap().to_string()
        };

        let mut env = Environment::open(&config).unwrap();
        assert_eq!(env.startup_report().rolled_forward.len(), 1);
        env.start_session().unwrap();
        let f = env.get_file(&uuid).unwrap();
        let b = env.get_blob(f, "default").unwrap();
        assert_eq!(env.read_blob(b).unwrap(), b"survives");
        assert!(env.check().unwrap().is_clean());
    }

    #[test]
    fn store_into_vanished_blob_fails_the_publish() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = memory_env(dir.path());
        let session = env.start_session().unwrap();
        let f = env.create_file().unwrap();
        let b = env.add_blob(f, "default", "text/plain").unwrap();
        env.write_blob(b, b"orphaned").unwrap();
        let file_id = env.active().unwrap().cache.file(f).unwrap().id;
        env.conn
            .statement("delete from file where id = ?1", &sql_params![file_id])
            .unwrap();

        let err = env.publish(session).unwrap_err();
        assert!(matches!(err, EnvError::LostStore { blob, .. } if blob == env.blob_id(b).unwrap()));
        assert_eq!(env.session(), Some(session));
        assert_eq!(
            sessions::get(env.conn.as_ref(), session).unwrap().unwrap().state,
            SessionState::Ready
        );

        env.rollback_session().unwrap();
        assert_eq!(fs::read_dir(dir.path().join("temp")).unwrap().count(), 0);
    }

    #[test]
    fn backups_of_a_published_commit_are_reclaimed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::at(dir.path());
        let uuid = {
            let mut env = Environment::open(&config).unwrap();
            env.start_session().unwrap();
            let f = env.create_file().unwrap();
            let b = env.add_blob(f, "default", "text/plain").unwrap();
            env.write_blob(b, b"v1").unwrap();
            let uuid = env.file_uuid(f).unwrap().to_string();
            env.commit_session("full").unwrap();
            uuid
        };

        {
            let mut env = Environment::open(&config).unwrap();
            let session = env.start_session().unwrap();
            let f = env.get_file(&uuid).unwrap();
            let b = env.get_blob(f, "default").unwrap();
            env.write_blob(b, b"v2").unwrap();
            env.validate(session, &Full).unwrap();
            // Rows published, then the process dies before dropping backups.
            let tx = publish::replay_vfs(env.conn.as_ref(), &env.vfs, session, false).unwrap();
            publish::publish_rows(env.conn.as_ref(), session).unwrap();
            std::mem::forget(tx);
        }
        assert_eq!(backups(dir.path()), 1);

        let mut env = Environment::open(&config).unwrap();
        let report = env.startup_report().clone();
        assert!(report.rolled_forward.is_empty());
        assert_eq!(report.discarded_files, 1);
        assert!(env.check().unwrap().is_clean());
        assert!(env.recover().unwrap().is_empty());

        env.start_session().unwrap();
        let f = env.get_file(&uuid).unwrap();
        let b = env.get_blob(f, "default").unwrap();
        assert_eq!(env.read_blob(b).unwrap(), b"v2");
        assert_eq!(backups(dir.path()), 0);
    }

    fn backups(root: &Path) -> usize {
        fs::read_dir(root.join("temp"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("bak-"))
            .count()
    }

    #[test]
    fn refused_validation_is_not_rolled_forward() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::at(dir.path());
        let mut other = Environment::open(&config).unwrap();
        other.start_session().unwrap();
        let uuid = {
            let mut env = Environment::open(&config).unwrap();
            let session = env.start_session().unwrap();
            let f = env.create_file().unwrap();
            assert!(env.validate(session, &Full).is_err());
            env.file_uuid(f).unwrap().to_string()
        };
        other.rollback_session().unwrap();

        let mut env = Environment::open(&config).unwrap();
        assert_eq!(env.startup_report().rolled_back.len(), 1);
        env.start_session().unwrap();
        assert!(matches!(env.get_file(&uuid), Err(EnvError::NotFound(_))));
    }
}
