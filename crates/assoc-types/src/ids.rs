use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of the reserved system prefix every installation is seeded with.
pub const SYSTEM_PREFIX_ID: u64 = 0;

/// Short name of the reserved system prefix.
pub const SYSTEM_PREFIX_NAME: &str = "sys";

/// URI of the reserved system prefix.
pub const SYSTEM_PREFIX_URI: &str = "urn:associative:sys:";

/// Id of the reserved object type marking a triple whose object is a blob id.
pub const BLOB_TYPE_ID: u64 = 0;

/// Name of the reserved blob object type.
pub const BLOB_TYPE_NAME: &str = "blob";

/// Identifier of a session row.
///
/// Allocated from the `ids` counter table when a session starts; never
/// reused, so a stale id can always be told apart from a live one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_raw_number() {
        assert_eq!(SessionId::new(42).to_string(), "42");
        assert_eq!(format!("{:?}", SessionId::new(7)), "SessionId(7)");
    }

    #[test]
    fn ordering_follows_allocation() {
        assert!(SessionId::new(1) < SessionId::new(2));
    }

    #[test]
    fn serde_is_transparent_number() {
        let json = serde_json::to_string(&SessionId::new(9)).unwrap();
        assert_eq!(json, "9");
        let parsed: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get(), 9);
    }
}
