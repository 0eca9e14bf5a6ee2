//! Startup reconciliation of sessions left behind by dead processes.

use std::collections::BTreeSet;

use assoc_db::{handles, journal, sessions, Connection};
use assoc_types::{SessionId, SessionState};
use assoc_vfs::{SessionLiveness, Vfs};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EnvResult;
use crate::publish;

/// What [`recover`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Sessions that had passed validation and were completed.
    pub rolled_forward: Vec<SessionId>,
    /// Sessions whose changes were discarded.
    pub rolled_back: Vec<SessionId>,
    /// Sessions whose owner is still running.
    pub skipped_live: Vec<SessionId>,
    pub orphan_handles: usize,
    /// Staged files and backups deleted.
    pub discarded_files: usize,
}

impl RecoveryReport {
    /// Whether nothing needed reconciling.
    pub fn is_empty(&self) -> bool {
        self.rolled_forward.is_empty()
            && self.rolled_back.is_empty()
            && self.orphan_handles == 0
            && self.discarded_files == 0
    }
}

/// Reconcile every session whose liveness marker is free, except `current`.
///
/// The caller holds the commit lock.
pub(crate) fn recover(
    conn: &dyn Connection,
    vfs: &Vfs,
    data_source: &str,
    current: Option<SessionId>,
) -> EnvResult<RecoveryReport> {
    let mut report = RecoveryReport::default();
    for row in sessions::list(conn)? {
        if Some(row.id) == current {
            continue;
        }
        let liveness = SessionLiveness::new(vfs.root(), data_source, row.id);
        if liveness.is_held()? {
            report.skipped_live.push(row.id);
            continue;
        }
        if row.state == SessionState::Validated {
            roll_forward(conn, vfs, row.id, &mut report)?;
        } else {
            roll_back(conn, vfs, row.id, &mut report)?;
        }
        liveness.discard();
    }
    report.orphan_handles = handles::purge_orphan_handles(conn)?;
    report.discarded_files += discard_orphan_backups(conn, vfs)?;

    if !report.is_empty() {
        info!(
            rolled_forward = report.rolled_forward.len(),
            rolled_back = report.rolled_back.len(),
            orphan_handles = report.orphan_handles,
            discarded_files = report.discarded_files,
            "recovered abandoned sessions"
        );
    }
    Ok(report)
}

/// Delete backups whose session row is gone. A commit that published its
/// rows but died before dropping its backups leaves these behind.
fn discard_orphan_backups(conn: &dyn Connection, vfs: &Vfs) -> EnvResult<usize> {
    let known: BTreeSet<SessionId> = sessions::list(conn)?.into_iter().map(|row| row.id).collect();
    let mut removed = 0;
    for owner in vfs.backup_sessions()?.difference(&known) {
        removed += vfs.discard_backups(*owner)?;
    }
    Ok(removed)
}

fn roll_forward(
    conn: &dyn Connection,
    vfs: &Vfs,
    session: SessionId,
    report: &mut RecoveryReport,
) -> EnvResult<()> {
    let tx = publish::replay_vfs(conn, vfs, session, true)?;
    let removed = publish::removed_files(conn, session)?;
    publish::publish_rows(conn, session)?;
    if let Err(e) = tx.finish() {
        warn!(session = %session, error = %e, "failed to drop backups");
    }
    publish::prune_dirs(vfs, &removed);
    report.discarded_files += publish::discard_staged(vfs, session, &[]);
    report.rolled_forward.push(session);
    info!(session = %session, "rolled forward validated session");
    Ok(())
}

fn roll_back(
    conn: &dyn Connection,
    vfs: &Vfs,
    session: SessionId,
    report: &mut RecoveryReport,
) -> EnvResult<()> {
    let staged = journal::staged_targets(conn, session)?;
    publish::discard_rows(conn, session)?;
    report.discarded_files += publish::discard_staged(vfs, session, &staged);
    report.rolled_back.push(session);
    info!(session = %session, "rolled back abandoned session");
    Ok(())
}
