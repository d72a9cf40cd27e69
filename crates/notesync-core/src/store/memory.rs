use super::{Record, RecordStore, RecordUpdate};
use crate::error::{NotesyncError, Result};
use std::sync::Mutex;

/// In-process store with the same compare-and-swap rules as the remote one.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record and return its store id.
    pub fn insert(&self, task_id: impl Into<String>, notes: impl Into<String>) -> String {
        let mut records = self.lock();
        let id = format!("rec{}", records.len() + 1);
        records.push(Record {
            id: id.clone(),
            task_id: task_id.into(),
            status: None,
            notes: notes.into(),
        });
        id
    }

    pub fn get(&self, task_id: &str) -> Option<Record> {
        self.lock().iter().find(|r| r.task_id == task_id).cloned()
    }

    /// Overwrite notes directly, bypassing the compare-and-swap check.
    pub fn set_notes(&self, task_id: &str, notes: impl Into<String>) -> Result<()> {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| r.task_id == task_id)
            .ok_or_else(|| NotesyncError::RecordNotFound(task_id.to_string()))?;
        record.notes = notes.into();
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryRecordStore {
    fn find(&self, task_id: &str) -> Result<Record> {
        let records = self.lock();
        let mut matches = records.iter().filter(|r| r.task_id == task_id);
        let record = matches
            .next()
            .ok_or_else(|| NotesyncError::RecordNotFound(task_id.to_string()))?;
        if matches.next().is_some() {
            return Err(NotesyncError::DuplicateRecord(task_id.to_string()));
        }
        Ok(record.clone())
    }

    fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()> {
        let mut records = self.lock();
        let current = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| NotesyncError::RecordNotFound(record.task_id.clone()))?;
        if current.notes != record.notes {
            return Err(NotesyncError::Conflict(record.task_id.clone()));
        }
        current.notes = update.notes.clone();
        if let Some(status) = update.status {
            current.status = Some(status.field_value().to_string());
        }
        Ok(())
    }
}
