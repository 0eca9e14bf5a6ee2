//! Consistency report comparing the blob tree with the relational store.

use std::collections::BTreeSet;

use assoc_db::{sessions, Connection};
use assoc_vfs::{backup_seed, Vfs};
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{EnvError, EnvResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// `uuid/name` content files with no visible blob row.
    pub orphan_content: Vec<String>,
    /// Visible blobs without a content file. Legal for blobs that were
    /// never written, so not counted against [`CheckReport::is_clean`].
    pub missing_content: Vec<String>,
    /// Temp files neither staged by a journal entry nor a backup of an
    /// open session.
    pub stray_temps: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_content.is_empty() && self.stray_temps.is_empty()
    }
}

pub(crate) fn check(conn: &dyn Connection, vfs: &Vfs) -> EnvResult<CheckReport> {
    let rows = conn.execute_query(
        "select file.uuid, blob.name from blob join file on file.id = blob.file_id \
         where blob.visible = 1",
    )?;
    let mut expected = BTreeSet::new();
    for row in &rows {
        expected.insert(format!("{}/{}", row.get_str(0)?, row.get_str(1)?));
    }

    let mut present = BTreeSet::new();
    for entry in WalkDir::new(vfs.blobs_dir()).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| walk_error(vfs.blobs_dir(), e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(vfs.blobs_dir()) {
            present.insert(relative.to_string_lossy().into_owned());
        }
    }

    let staged = conn.execute_query("select target from journal where target is not null")?;
    let mut known_temps = BTreeSet::new();
    for row in &staged {
        known_temps.insert(row.get_str(0)?.to_string());
    }
    let backup_seeds: Vec<String> = sessions::list(conn)?
        .into_iter()
        .map(|row| backup_seed(row.id))
        .collect();

    let mut stray_temps = Vec::new();
    for entry in WalkDir::new(vfs.temp_dir()).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| walk_error(vfs.temp_dir(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let backup = backup_seeds.iter().any(|seed| name.starts_with(seed.as_str()));
        if !known_temps.contains(&name) && !backup {
            stray_temps.push(name);
        }
    }
    stray_temps.sort();

    let report = CheckReport {
        orphan_content: present.difference(&expected).cloned().collect(),
        missing_content: expected.difference(&present).cloned().collect(),
        stray_temps,
    };
    debug!(
        orphans = report.orphan_content.len(),
        missing = report.missing_content.len(),
        stray = report.stray_temps.len(),
        "consistency check finished"
    );
    Ok(report)
}

fn walk_error(dir: &std::path::Path, e: walkdir::Error) -> EnvError {
    let source = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory loop"));
    EnvError::Io {
        path: dir.to_path_buf(),
        source,
    }
}
