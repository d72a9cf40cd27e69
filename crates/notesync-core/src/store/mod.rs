//! Record store boundary: the remote task tracker holding each task's
//! status and notes.

mod http;
mod memory;

pub use http::HttpRecordStore;
pub use memory::MemoryRecordStore;

use crate::error::Result;
use crate::status::Status;
use serde::{Deserialize, Serialize};

/// A task record as last read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The store's own identifier.
    pub id: String,
    pub task_id: String,
    pub status: Option<String>,
    /// Empty when the field has never been written.
    #[serde(default)]
    pub notes: String,
}

/// Fields to write back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub notes: String,
    /// `None` leaves the status field untouched.
    pub status: Option<Status>,
}

pub trait RecordStore {
    /// Fetch the single record carrying `task_id`.
    fn find(&self, task_id: &str) -> Result<Record>;

    /// Compare-and-swap write: applied only if the record's notes still equal
    /// `record.notes`, otherwise fails with `Conflict`.
    fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn find(&self, task_id: &str) -> Result<Record> {
        (**self).find(task_id)
    }

    fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()> {
        (**self).write(record, update)
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn find(&self, task_id: &str) -> Result<Record> {
        (**self).find(task_id)
    }

    fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()> {
        (**self).write(record, update)
    }
}
