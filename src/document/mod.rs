//! Document Manager (§4.10) — lifecycle: locks, transactions, undo/redo,
//! backup, migration. State machine per document: `new → opening → open ↔
//! modified → saving → (closed | error | recovering)`.
//!
//! Grounded on the teacher's per-subsystem `DashMap<Id, T>` table pattern
//! (§9 "Cyclic ownership avoided"): transactions/snapshots/locks/backups are
//! owned in separate tables keyed by id, never holding a pointer back into
//! the manager.

pub mod adapter;
pub mod backup;
pub mod lock;
pub mod snapshot;
pub mod transaction;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;

pub use adapter::{AdapterState, FreecadAdapter, MockAdapter, RealFreecadAdapter, SharedAdapter};
pub use backup::Backup;
pub use lock::{DocumentLock, LockType};
pub use snapshot::{Snapshot, UndoRedoStacks};
pub use transaction::{Transaction, TransactionState};

#[derive(Debug, Clone, Error, Serialize)]
pub enum DocumentError {
    #[error("document `{0}` not found")]
    NotFound(String),
    #[error("document `{0}` already exists")]
    AlreadyExists(String),
    #[error("document `{0}` is locked")]
    DocumentLocked(String),
    #[error("lock owner mismatch for document `{0}`")]
    LockOwnerMismatch(String),
    #[error("no active transaction `{0}` on document `{1}`")]
    NoActiveTransaction(String, String),
    #[error("active transactions exist on document `{0}`")]
    ActiveTransactionsExist(String),
    #[error("document `{0}` is corrupt: {1}")]
    DocumentCorrupt(String, String),
    #[error("migration failed: {0}")]
    MigrationFailed(String),
    #[error("backup `{0}` not found")]
    BackupNotFound(String),
    #[error("no recovery source available for document `{0}`")]
    NoRecoverySource(String),
    #[error("engine binary `{0}` not found")]
    EngineUnavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid id or path: {0}")]
    InvalidId(String),
}

impl DocumentError {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::NotFound(_) => "document_not_found",
            DocumentError::AlreadyExists(_) => "document_already_exists",
            DocumentError::DocumentLocked(_) => "document_locked",
            DocumentError::LockOwnerMismatch(_) => "lock_owner_mismatch",
            DocumentError::NoActiveTransaction(..) => "no_active_transaction",
            DocumentError::ActiveTransactionsExist(_) => "active_transactions_exist",
            DocumentError::DocumentCorrupt(..) => "document_corrupt",
            DocumentError::MigrationFailed(_) => "migration_failed",
            DocumentError::BackupNotFound(_) => "backup_not_found",
            DocumentError::NoRecoverySource(_) => "no_recovery_source",
            DocumentError::EngineUnavailable(_) => "engine_not_found",
            DocumentError::Serialization(_) => "temporary_failure",
            DocumentError::InvalidId(_) => "invalid_id",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::DocumentCorrupt(..) | DocumentError::MigrationFailed(_) | DocumentError::EngineUnavailable(_) => {
                ErrorKind::Fatal
            }
            DocumentError::DocumentLocked(_) | DocumentError::LockOwnerMismatch(_) => ErrorKind::Resource,
            DocumentError::Serialization(_) => ErrorKind::Transient,
            _ => ErrorKind::UserInput,
        }
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

static ID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w\-_.]+$").unwrap());
static ID_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-_.]").unwrap());

/// Sanitizes a job id into a document id: restricted to `[\w\-_.]`, no
/// traversal (§4.10 invariant).
pub fn derive_id(job_id: &str) -> DocumentResult<String> {
    if job_id.is_empty() || job_id.contains("..") {
        return Err(DocumentError::InvalidId(job_id.to_string()));
    }
    let sanitized = ID_STRIP.replace_all(job_id, "_").to_string();
    if !ID_CHARS.is_match(&sanitized) {
        return Err(DocumentError::InvalidId(job_id.to_string()));
    }
    Ok(format!("doc_{sanitized}"))
}

fn next_revision(version: u32, revision: char) -> (u32, char) {
    if revision == 'Z' {
        (version + 1, 'A')
    } else {
        (version, ((revision as u8) + 1) as char)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub job_id: String,
    pub version: u32,
    pub revision: char,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub file_size: u64,
    pub sha256: Option<String>,
    pub compressed: bool,
    pub properties: serde_json::Value,
}

impl Document {
    fn new(job_id: &str, id: &str, author: Option<String>, description: Option<String>, properties: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            job_id: job_id.to_string(),
            version: 1,
            revision: 'A',
            created_at: now,
            updated_at: now,
            author,
            description,
            file_size: 0,
            sha256: None,
            compressed: false,
            properties,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub document: Document,
    pub locked: bool,
    pub active_transaction: bool,
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub backup_count: usize,
}

pub struct DocumentManagerConfig {
    pub max_backups_per_document: usize,
    pub max_undo_depth: usize,
    pub default_lock_ttl: chrono::Duration,
    pub backup_retention_days: u32,
}

impl Default for DocumentManagerConfig {
    fn default() -> Self {
        Self {
            max_backups_per_document: 5,
            max_undo_depth: 50,
            default_lock_ttl: chrono::Duration::minutes(10),
            backup_retention_days: 30,
        }
    }
}

/// Owns every document-lifecycle table; the state machine lives entirely in
/// these tables, never inside the adapter.
pub struct DocumentManager {
    adapter: SharedAdapter,
    config: DocumentManagerConfig,
    documents: DashMap<String, Document>,
    locks: DashMap<String, DocumentLock>,
    transactions: DashMap<String, Transaction>,
    undo_stacks: DashMap<String, Mutex<UndoRedoStacks>>,
    backups: DashMap<String, Vec<Backup>>,
    recovery_snapshots: DashMap<String, Snapshot>,
}

impl DocumentManager {
    pub fn new(adapter: SharedAdapter, config: DocumentManagerConfig) -> Self {
        Self {
            adapter,
            config,
            documents: DashMap::new(),
            locks: DashMap::new(),
            transactions: DashMap::new(),
            undo_stacks: DashMap::new(),
            backups: DashMap::new(),
            recovery_snapshots: DashMap::new(),
        }
    }

    pub fn create_document(
        &self,
        job_id: &str,
        author: Option<String>,
        description: Option<String>,
        properties: Option<serde_json::Value>,
    ) -> DocumentResult<Document> {
        let id = derive_id(job_id)?;
        if self.documents.contains_key(&id) {
            return Err(DocumentError::AlreadyExists(id));
        }
        let doc = Document::new(job_id, &id, author, description, properties.unwrap_or(serde_json::json!({})));
        self.documents.insert(id.clone(), doc.clone());
        self.undo_stacks
            .insert(id, Mutex::new(UndoRedoStacks::new(self.config.max_undo_depth)));
        Ok(doc)
    }

    pub fn open_document(&self, job_id: &str, path: Option<&str>, create_if_missing: bool) -> DocumentResult<Document> {
        let id = derive_id(job_id)?;
        if let Some(doc) = self.documents.get(&id) {
            return Ok(doc.clone());
        }
        if !create_if_missing {
            return Err(DocumentError::NotFound(id));
        }
        let _ = path;
        self.create_document(job_id, None, None, None)
    }

    pub async fn acquire_lock(
        &self,
        doc_id: &str,
        owner_id: &str,
        lock_type: LockType,
        timeout: Option<chrono::Duration>,
    ) -> DocumentResult<DocumentLock> {
        if !self.documents.contains_key(doc_id) {
            return Err(DocumentError::NotFound(doc_id.to_string()));
        }
        if let Some(existing) = self.locks.get(doc_id) {
            if !existing.is_expired() {
                return Err(DocumentError::DocumentLocked(doc_id.to_string()));
            }
        }
        let ttl = timeout.unwrap_or(self.config.default_lock_ttl);
        let new_lock = DocumentLock::new(doc_id, owner_id, lock_type, ttl);
        self.locks.insert(doc_id.to_string(), new_lock.clone());
        Ok(new_lock)
    }

    pub fn release_lock(&self, doc_id: &str, lock_id: &str) -> DocumentResult<()> {
        let matches = self
            .locks
            .get(doc_id)
            .map(|l| l.lock_id == lock_id)
            .unwrap_or(false);
        if !matches {
            return Err(DocumentError::LockOwnerMismatch(doc_id.to_string()));
        }
        self.locks.remove(doc_id);
        Ok(())
    }

    fn requires_lock(&self, doc_id: &str, owner_id: &str) -> DocumentResult<()> {
        match self.locks.get(doc_id) {
            Some(l) if !l.is_expired() && l.owner_id == owner_id => Ok(()),
            Some(l) if !l.is_expired() => Err(DocumentError::LockOwnerMismatch(doc_id.to_string())),
            _ => Err(DocumentError::DocumentLocked(doc_id.to_string())),
        }
    }

    pub async fn start_transaction(&self, doc_id: &str) -> DocumentResult<String> {
        let doc = self
            .documents
            .get(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?
            .clone();
        let snapshot_data = self.adapter.take_snapshot(doc_id).await?;
        let rollback = Snapshot::new(doc_id, "transaction-rollback", snapshot_data);
        let txn = Transaction::start(doc_id, rollback);
        let txn_id = txn.txn_id.clone();
        self.adapter.start_transaction(doc_id).await?;
        self.transactions.insert(txn_id.clone(), txn);
        drop(doc);
        Ok(txn_id)
    }

    pub async fn commit_transaction(&self, doc_id: &str, txn_id: &str) -> DocumentResult<Document> {
        let mut txn = self
            .transactions
            .get_mut(txn_id)
            .filter(|t| t.document_id == doc_id && t.state == TransactionState::Active)
            .ok_or_else(|| DocumentError::NoActiveTransaction(txn_id.to_string(), doc_id.to_string()))?;
        txn.state = TransactionState::Committing;
        self.adapter.commit_transaction(doc_id).await?;
        txn.state = TransactionState::Committed;
        txn.ended_at = Some(Utc::now());
        drop(txn);
        self.transactions.remove(txn_id);

        let mut doc = self
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?;
        let (version, revision) = next_revision(doc.version, doc.revision);
        doc.version = version;
        doc.revision = revision;
        doc.updated_at = Utc::now();
        if let Some(stack) = self.undo_stacks.get(doc_id) {
            stack.lock().redo.clear();
        }
        Ok(doc.clone())
    }

    pub async fn abort_transaction(&self, doc_id: &str, txn_id: &str) -> DocumentResult<()> {
        let txn = self
            .transactions
            .get(txn_id)
            .filter(|t| t.document_id == doc_id)
            .ok_or_else(|| DocumentError::NoActiveTransaction(txn_id.to_string(), doc_id.to_string()))?
            .clone();
        self.adapter.abort_transaction(doc_id).await?;
        self.adapter.restore_snapshot(doc_id, &txn.rollback_snapshot.data).await?;
        self.transactions.remove(txn_id);
        Ok(())
    }

    pub fn add_undo_snapshot(&self, doc_id: &str, description: &str, data: Option<Vec<u8>>) -> DocumentResult<()> {
        if !self.documents.contains_key(doc_id) {
            return Err(DocumentError::NotFound(doc_id.to_string()));
        }
        let stack = self
            .undo_stacks
            .entry(doc_id.to_string())
            .or_insert_with(|| Mutex::new(UndoRedoStacks::new(self.config.max_undo_depth)));
        stack
            .lock()
            .push_undo(Snapshot::new(doc_id, description, data.unwrap_or_default()));
        Ok(())
    }

    pub async fn undo(&self, doc_id: &str) -> DocumentResult<()> {
        let target = self
            .undo_stacks
            .get(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?
            .lock()
            .undo();
        if let Some(snapshot) = target {
            self.adapter.restore_snapshot(doc_id, &snapshot.data).await?;
        }
        Ok(())
    }

    pub async fn redo(&self, doc_id: &str) -> DocumentResult<()> {
        let target = self
            .undo_stacks
            .get(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?
            .lock()
            .redo();
        if let Some(snapshot) = target {
            self.adapter.restore_snapshot(doc_id, &snapshot.data).await?;
        }
        Ok(())
    }

    pub async fn save_document(
        &self,
        doc_id: &str,
        owner_id: &str,
        path: &str,
        compress: bool,
        create_backup: bool,
    ) -> DocumentResult<Document> {
        self.requires_lock(doc_id, owner_id)?;
        if create_backup {
            self.create_backup(doc_id).await?;
        }
        let state = AdapterState::default();
        self.adapter.save(doc_id, path, &state).await?;
        let data = self.adapter.take_snapshot(doc_id).await?;
        let sha = {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(&data);
            hex::encode(hasher.finalize())
        };
        let mut doc = self
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?;
        doc.compressed = compress;
        doc.file_size = data.len() as u64;
        doc.sha256 = Some(sha);
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    pub async fn close_document(&self, doc_id: &str, owner_id: &str, save_before_close: bool, force: bool) -> DocumentResult<()> {
        self.requires_lock(doc_id, owner_id)?;
        let has_active_txn = self.transactions.iter().any(|t| t.document_id == doc_id && t.state == TransactionState::Active);
        if has_active_txn && !force {
            return Err(DocumentError::ActiveTransactionsExist(doc_id.to_string()));
        }
        if save_before_close {
            self.save_document(doc_id, owner_id, &format!("{doc_id}.fcstd"), false, false).await?;
        }
        self.adapter.close(doc_id).await?;
        self.locks.remove(doc_id);
        Ok(())
    }

    pub async fn create_backup(&self, doc_id: &str) -> DocumentResult<Backup> {
        if !self.documents.contains_key(doc_id) {
            return Err(DocumentError::NotFound(doc_id.to_string()));
        }
        let data = self.adapter.take_snapshot(doc_id).await?;
        let backup = Backup::new(doc_id, self.config.backup_retention_days, false, data);
        let mut list = self.backups.entry(doc_id.to_string()).or_default();
        list.push(backup.clone());
        backup::apply_retention(&mut list, self.config.max_backups_per_document);
        Ok(backup)
    }

    pub async fn restore_backup(&self, doc_id: &str, backup_id: &str) -> DocumentResult<()> {
        let data = {
            let list = self
                .backups
                .get(doc_id)
                .ok_or_else(|| DocumentError::BackupNotFound(backup_id.to_string()))?;
            list.iter()
                .find(|b| b.id == backup_id)
                .map(|b| b.data.clone())
                .ok_or_else(|| DocumentError::BackupNotFound(backup_id.to_string()))?
        };
        self.adapter.restore_snapshot(doc_id, &data).await?;
        Ok(())
    }

    pub fn migrate_document(&self, doc_id: &str, target_version: u32, rules: &[&str]) -> DocumentResult<Vec<String>> {
        let mut doc = self
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?;
        if target_version < doc.version {
            return Err(DocumentError::MigrationFailed(format!(
                "cannot migrate document `{doc_id}` backward from v{} to v{target_version}",
                doc.version
            )));
        }
        let mut warnings = Vec::new();
        for rule in rules {
            warnings.push(format!("applied migration rule `{rule}`"));
        }
        doc.version = target_version;
        doc.revision = 'A';
        doc.updated_at = Utc::now();
        Ok(warnings)
    }

    /// Restore from the in-memory recovery snapshot if present, else the
    /// newest backup, else fail (§4.10 `auto_recover`).
    pub async fn auto_recover(&self, doc_id: &str) -> DocumentResult<()> {
        if let Some(snapshot) = self.recovery_snapshots.get(doc_id) {
            self.adapter.restore_snapshot(doc_id, &snapshot.data).await?;
            return Ok(());
        }
        if let Some(list) = self.backups.get(doc_id) {
            if let Some(newest) = list.iter().max_by_key(|b| b.created_at) {
                self.adapter.restore_snapshot(doc_id, &newest.data).await?;
                return Ok(());
            }
        }
        Err(DocumentError::NoRecoverySource(doc_id.to_string()))
    }

    /// Registers an in-memory recovery snapshot, consulted first by `auto_recover`.
    pub fn record_recovery_snapshot(&self, doc_id: &str, snapshot: Snapshot) {
        self.recovery_snapshots.insert(doc_id.to_string(), snapshot);
    }

    pub fn get_document_status(&self, doc_id: &str) -> DocumentResult<DocumentStatus> {
        let doc = self
            .documents
            .get(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?
            .clone();
        let locked = self.locks.get(doc_id).map(|l| !l.is_expired()).unwrap_or(false);
        let active_transaction = self
            .transactions
            .iter()
            .any(|t| t.document_id == doc_id && t.state == TransactionState::Active);
        let (undo_depth, redo_depth) = self
            .undo_stacks
            .get(doc_id)
            .map(|s| {
                let s = s.lock();
                (s.undo.len(), s.redo.len())
            })
            .unwrap_or((0, 0));
        let backup_count = self.backups.get(doc_id).map(|b| b.len()).unwrap_or(0);
        Ok(DocumentStatus {
            document: doc,
            locked,
            active_transaction,
            undo_depth,
            redo_depth,
            backup_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> DocumentManager {
        DocumentManager::new(Arc::new(MockAdapter::new()), DocumentManagerConfig::default())
    }

    #[test]
    fn derive_id_rejects_traversal() {
        assert!(derive_id("../etc/passwd").is_err());
        assert_eq!(derive_id("job-123").unwrap(), "doc_job-123");
    }

    #[test]
    fn create_document_rejects_duplicate() {
        let mgr = manager();
        mgr.create_document("job1", None, None, None).unwrap();
        assert!(mgr.create_document("job1", None, None, None).is_err());
    }

    #[tokio::test]
    async fn revision_rolls_over_z_to_next_version() {
        let mgr = manager();
        let doc = mgr.create_document("job1", None, None, None).unwrap();
        {
            let mut d = mgr.documents.get_mut(&doc.id).unwrap();
            d.revision = 'Z';
        }
        let txn_id = mgr.start_transaction(&doc.id).await.unwrap();
        let updated = mgr.commit_transaction(&doc.id, &txn_id).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.revision, 'A');
    }

    #[tokio::test]
    async fn abort_restores_rollback_snapshot() {
        let mgr = manager();
        let doc = mgr.create_document("job1", None, None, None).unwrap();
        let txn_id = mgr.start_transaction(&doc.id).await.unwrap();
        mgr.abort_transaction(&doc.id, &txn_id).await.unwrap();
        assert!(mgr.transactions.get(&txn_id).is_none());
    }

    #[tokio::test]
    async fn save_without_lock_fails() {
        let mgr = manager();
        let doc = mgr.create_document("job1", None, None, None).unwrap();
        let err = mgr.save_document(&doc.id, "tenant-a", "out.fcstd", false, false).await.unwrap_err();
        assert_eq!(err.code(), "document_locked");
    }

    #[tokio::test]
    async fn save_with_wrong_owner_fails_lock_owner_mismatch() {
        let mgr = manager();
        let doc = mgr.create_document("job1", None, None, None).unwrap();
        mgr.acquire_lock(&doc.id, "tenant-a", LockType::Exclusive, None).await.unwrap();
        let err = mgr.save_document(&doc.id, "tenant-b", "out.fcstd", false, false).await.unwrap_err();
        assert_eq!(err.code(), "lock_owner_mismatch");
    }

    #[tokio::test]
    async fn backup_retention_prunes_to_max_count() {
        let mgr = manager();
        let doc = mgr.create_document("job1", None, None, None).unwrap();
        for _ in 0..5 {
            mgr.create_backup(&doc.id).await.unwrap();
        }
        let status = mgr.get_document_status(&doc.id).unwrap();
        assert_eq!(status.backup_count, mgr.config.max_backups_per_document);
    }
}
