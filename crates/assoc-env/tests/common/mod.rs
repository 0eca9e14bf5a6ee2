#![allow(dead_code)]

use std::path::Path;

use assoc_env::{CommitReason, EnvError, Environment, StoreConfig};

/// A SQLite-backed store under `dir`, shared by every environment opened on it.
pub fn store(dir: &Path) -> StoreConfig {
    StoreConfig {
        max_lock_wait_ms: 2_000,
        ..StoreConfig::at(dir)
    }
}

pub fn open(config: &StoreConfig) -> Environment {
    Environment::open(config).unwrap()
}

/// Commit a file holding one blob per `(name, content)` pair and return its uuid.
pub fn seed(config: &StoreConfig, blobs: &[(&str, &[u8])]) -> String {
    let mut env = open(config);
    env.start_session().unwrap();
    let file = env.create_file().unwrap();
    for (name, content) in blobs {
        let blob = env.add_blob(file, name, "application/octet-stream").unwrap();
        env.write_blob(blob, content).unwrap();
    }
    let uuid = env.file_uuid(file).unwrap().to_string();
    env.commit_session("full").unwrap();
    uuid
}

/// The refusal reason of a commit attempt, `None` if it succeeded.
pub fn attempt(env: &mut Environment, level: &str) -> Option<CommitReason> {
    match env.commit_session(level) {
        Ok(()) => None,
        Err(EnvError::Commit(e)) => Some(e.reason),
        Err(e) => panic!("commit under {level} failed: {e}"),
    }
}
