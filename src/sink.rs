//! Module that contains the destinations for assembled snapshots.

use crate::{error::SinkError, snapshot::SnapshotDocument, ProcessId, SnapshotId};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

pub trait SnapshotSink: Send + Sync {
    fn persist(
        &self,
        process_id: ProcessId,
        snapshot_id: SnapshotId,
        document: &SnapshotDocument,
    ) -> Result<(), SinkError>;
}

/// Writes each document to `<dir>/snapshot_<pid>_sid<snapshotID>.json`.
pub struct FileSnapshotSink {
    dir: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, process_id: ProcessId, snapshot_id: SnapshotId) -> PathBuf {
        self.dir
            .join(format!("snapshot_{process_id}_sid{snapshot_id}.json"))
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn persist(
        &self,
        process_id: ProcessId,
        snapshot_id: SnapshotId,
        document: &SnapshotDocument,
    ) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(process_id, snapshot_id), document.to_json()?)?;
        Ok(())
    }
}

/// Keeps every persisted document in memory.
#[derive(Default)]
pub struct MemorySnapshotSink {
    documents: Mutex<Vec<(ProcessId, SnapshotId, SnapshotDocument)>>,
}

impl MemorySnapshotSink {
    pub fn documents(&self) -> Vec<(ProcessId, SnapshotId, SnapshotDocument)> {
        self.documents
            .lock()
            .map(|documents| documents.clone())
            .unwrap_or_default()
    }
}

impl SnapshotSink for MemorySnapshotSink {
    fn persist(
        &self,
        process_id: ProcessId,
        snapshot_id: SnapshotId,
        document: &SnapshotDocument,
    ) -> Result<(), SinkError> {
        if let Ok(mut documents) = self.documents.lock() {
            documents.push((process_id, snapshot_id, document.clone()));
        }
        Ok(())
    }
}
