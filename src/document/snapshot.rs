//! Snapshots and the bounded undo/redo stacks (§3 "Snapshot", §4.10
//! `add_undo_snapshot`/`undo`/`redo`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Default)]
pub struct Snapshot {
    pub id: String,
    pub document_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub description: String,
    pub data: Vec<u8>,
    pub size: usize,
}

impl Snapshot {
    pub fn new(document_id: &str, description: &str, data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            timestamp: Some(Utc::now()),
            description: description.to_string(),
            data,
            size,
        }
    }
}

/// Bounded undo stack; pushing past `max_depth` drops the oldest entry.
/// Any new undo push clears the redo stack (§4.10 invariant).
#[derive(Default)]
pub struct UndoRedoStacks {
    pub undo: Vec<Snapshot>,
    pub redo: Vec<Snapshot>,
    pub max_depth: usize,
}

impl UndoRedoStacks {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            max_depth,
        }
    }

    pub fn push_undo(&mut self, snapshot: Snapshot) {
        self.undo.push(snapshot);
        if self.undo.len() > self.max_depth {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    /// Moves the top undo entry to redo, returning the snapshot to restore
    /// (the *previous* one, if any — the caller restores to the state before
    /// the popped entry was taken).
    pub fn undo(&mut self) -> Option<Snapshot> {
        let entry = self.undo.pop()?;
        self.redo.push(entry.clone());
        self.undo.last().cloned()
    }

    pub fn redo(&mut self) -> Option<Snapshot> {
        let entry = self.redo.pop()?;
        self.undo.push(entry.clone());
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_push_clears_redo() {
        let mut stacks = UndoRedoStacks::new(10);
        stacks.push_undo(Snapshot::new("d1", "s1", vec![1]));
        stacks.push_undo(Snapshot::new("d1", "s2", vec![2]));
        stacks.undo();
        assert_eq!(stacks.redo.len(), 1);
        stacks.push_undo(Snapshot::new("d1", "s3", vec![3]));
        assert!(stacks.redo.is_empty());
    }

    #[test]
    fn bounded_depth_drops_oldest() {
        let mut stacks = UndoRedoStacks::new(2);
        stacks.push_undo(Snapshot::new("d1", "s1", vec![1]));
        stacks.push_undo(Snapshot::new("d1", "s2", vec![2]));
        stacks.push_undo(Snapshot::new("d1", "s3", vec![3]));
        assert_eq!(stacks.undo.len(), 2);
        assert_eq!(stacks.undo[0].description, "s2");
    }
}
