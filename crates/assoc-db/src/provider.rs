use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::error::{DbError, DbResult};
use crate::sqlite::SqliteConnection;
use crate::traits::Connection;

/// Constructor for a connection from the parameter part of a data source.
pub type ProviderFn = fn(&str) -> DbResult<Box<dyn Connection>>;

/// Maps provider names to connection constructors.
///
/// A data source has the form `<provider>:<parameters>`, e.g.
/// `sqlite3:/var/lib/assoc/store.db` or `memory:`.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderFn>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// A registry with the built-in `sqlite3` and `memory` providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("sqlite3", open_sqlite);
        registry.register("memory", open_memory);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, provider: ProviderFn) {
        self.providers.insert(name.into(), provider);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Split a data source into provider name and parameters.
    pub fn parse(data_source: &str) -> DbResult<(&str, &str)> {
        match data_source.split_once(':') {
            Some((provider, params)) if !provider.is_empty() => Ok((provider, params)),
            _ => Err(DbError::InvalidDataSource(data_source.to_string())),
        }
    }

    /// Open a connection for the given data source.
    pub fn connect(&self, data_source: &str) -> DbResult<Box<dyn Connection>> {
        let (name, params) = Self::parse(data_source)?;
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| DbError::UnknownProvider(name.to_string()))?;
        let conn = provider(params)?;
        info!(provider = name, "connected to backing store");
        Ok(conn)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

fn open_sqlite(params: &str) -> DbResult<Box<dyn Connection>> {
    if params.is_empty() {
        return Err(DbError::InvalidDataSource("sqlite3:".to_string()));
    }
    Ok(Box::new(SqliteConnection::open(Path::new(params))?))
}

fn open_memory(_params: &str) -> DbResult<Box<dyn Connection>> {
    Ok(Box::new(SqliteConnection::open_in_memory()?))
}
