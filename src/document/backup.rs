//! Backups and retention (§3 "Backup", §4.10 `create_backup`/`restore_backup`,
//! scenario 8: retention prunes by age **and** by max count, newest kept).

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    pub id: String,
    pub document_id: String,
    pub created_at: DateTime<Utc>,
    pub retention_days: u32,
    pub compressed: bool,
    pub data: Vec<u8>,
}

impl Backup {
    pub fn new(document_id: &str, retention_days: u32, compressed: bool, data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("backup_{document_id}_{}", now.format("%Y%m%d_%H%M%S")),
            document_id: document_id.to_string(),
            created_at: now,
            retention_days,
            compressed,
            data,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > chrono::Duration::days(self.retention_days as i64)
    }
}

/// Prunes `backups` in place to satisfy both the age limit and `max_count`,
/// keeping the newest `max_count` by `created_at`. Returns the ids removed.
pub fn apply_retention(backups: &mut Vec<Backup>, max_count: usize) -> Vec<String> {
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut removed = Vec::new();
    backups.retain(|b| {
        if b.is_expired() {
            removed.push(b.id.clone());
            false
        } else {
            true
        }
    });
    while backups.len() > max_count {
        if let Some(last) = backups.pop() {
            removed.push(last.id);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_keeps_newest_by_count() {
        let mut backups: Vec<Backup> = (0..5)
            .map(|i| {
                let mut b = Backup::new("doc1", 365, false, vec![]);
                b.created_at = Utc::now() - chrono::Duration::minutes(i);
                b.id = format!("b{i}");
                b
            })
            .collect();
        let removed = apply_retention(&mut backups, 3);
        assert_eq!(backups.len(), 3);
        assert_eq!(removed.len(), 2);
        assert!(backups.iter().any(|b| b.id == "b0"));
        assert!(!backups.iter().any(|b| b.id == "b3" || b.id == "b4"));
    }

    #[test]
    fn retention_drops_expired_regardless_of_count() {
        let mut backups = vec![Backup::new("doc1", 1, false, vec![])];
        backups[0].created_at = Utc::now() - chrono::Duration::days(5);
        let removed = apply_retention(&mut backups, 10);
        assert!(backups.is_empty());
        assert_eq!(removed.len(), 1);
    }
}
