//! Task objects driven by the content worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::content::autoscan::ScanMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    AddFile,
    RemoveObject,
    RescanDirectory,
    LoadAccounting,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    AddFile {
        path: PathBuf,
        recursive: bool,
        hidden: bool,
    },
    RemoveObject {
        object_id: i64,
        all: bool,
    },
    RescanDirectory {
        object_id: i64,
        scan_id: i32,
        mode: ScanMode,
    },
    LoadAccounting,
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::AddFile { .. } => TaskType::AddFile,
            TaskKind::RemoveObject { .. } => TaskType::RemoveObject,
            TaskKind::RescanDirectory { .. } => TaskType::RescanDirectory,
            TaskKind::LoadAccounting => TaskType::LoadAccounting,
        }
    }
}

#[derive(Debug)]
pub struct Task {
    id: u32,
    parent_id: u32,
    cancellable: bool,
    valid: AtomicBool,
    pub kind: TaskKind,
    pub description: String,
}

impl Task {
    pub fn new(kind: TaskKind, cancellable: bool) -> Arc<Self> {
        Arc::new(Self {
            id: 0,
            parent_id: 0,
            cancellable,
            valid: AtomicBool::new(true),
            kind,
            description: String::new(),
        })
    }

    pub(super) fn with_ids(
        kind: TaskKind,
        cancellable: bool,
        id: u32,
        parent_id: u32,
        description: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            parent_id,
            cancellable,
            valid: AtomicBool::new(true),
            kind,
            description,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn parent_id(&self) -> u32 {
        self.parent_id
    }

    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// The scan this task belongs to, for task-count bookkeeping.
    pub fn scan_id(&self) -> Option<(i32, ScanMode)> {
        match self.kind {
            TaskKind::RescanDirectory { scan_id, mode, .. } => Some((scan_id, mode)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate() {
        let task = Task::new(TaskKind::LoadAccounting, true);
        assert!(task.is_valid());
        task.invalidate();
        assert!(!task.is_valid());
    }

    #[test]
    fn test_task_type_mapping() {
        let task = Task::new(
            TaskKind::AddFile {
                path: PathBuf::from("/m/a.mp3"),
                recursive: false,
                hidden: false,
            },
            true,
        );
        assert_eq!(task.kind.task_type(), TaskType::AddFile);
    }
}
