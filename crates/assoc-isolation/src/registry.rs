use std::collections::BTreeMap;

use crate::error::{IsolationError, IsolationResult};
use crate::level::IsolationLevel;
use crate::levels::{AlmostFull, BlobExclusive, FileExclusive, Full, Unsafe};

/// Built-in level names from weakest to strongest guarantee.
pub const STRENGTH_ORDER: [&str; 5] = [
    "unsafe",
    "blob-exclusive",
    "file-exclusive",
    "almost-full",
    "full",
];

/// The isolation levels available to a store, keyed by name.
///
/// Built once at startup and passed to whoever commits.
pub struct IsolationRegistry {
    levels: BTreeMap<&'static str, Box<dyn IsolationLevel>>,
}

impl IsolationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// A registry holding the five built-in levels.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(Unsafe));
        registry.register(Box::new(BlobExclusive));
        registry.register(Box::new(FileExclusive));
        registry.register(Box::new(AlmostFull));
        registry.register(Box::new(Full));
        registry
    }

    /// Add a level, replacing any level of the same name.
    pub fn register(&mut self, level: Box<dyn IsolationLevel>) {
        self.levels.insert(level.name(), level);
    }

    pub fn get(&self, name: &str) -> IsolationResult<&dyn IsolationLevel> {
        self.levels
            .get(name)
            .map(|level| level.as_ref())
            .ok_or_else(|| IsolationError::UnknownLevel {
                name: name.to_string(),
                known: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.levels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl Default for IsolationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for IsolationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.levels.keys()).finish()
    }
}
