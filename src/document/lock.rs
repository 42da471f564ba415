//! Document locks (§3 "Document Lock", §4.10 `acquire_lock`/`release_lock`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentLock {
    pub document_id: String,
    pub lock_id: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub lock_type: LockType,
}

impl DocumentLock {
    pub fn new(document_id: &str, owner_id: &str, lock_type: LockType, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.to_string(),
            lock_id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
            lock_type,
        }
    }

    /// A lock is logically absent once `now > expires_at` (§3 invariant).
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_expires_after_ttl() {
        let lock = DocumentLock::new("doc1", "tenant-a", LockType::Exclusive, chrono::Duration::seconds(-1));
        assert!(lock.is_expired());
    }
}
