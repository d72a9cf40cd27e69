//! Read-modify-write of a record's notes, with compare-and-swap and bounded
//! retry.

use crate::config::RetryConfig;
use crate::error::{NotesyncError, Result};
use crate::manifest::Manifest;
use crate::notes::{append_entry, UpdateEntry};
use crate::status::Status;
use crate::store::{RecordStore, RecordUpdate};
use backoff::backoff::Backoff;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub task_id: String,
    pub status: Status,
    pub content: String,
    /// Also write the record's status field.
    pub set_status: bool,
}

impl UpdateRequest {
    pub fn new(task_id: impl Into<String>, status: Status, content: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            content: content.into(),
            set_status: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub task_id: String,
    pub record_id: String,
    pub entry: UpdateEntry,
    /// Full notes value after the update.
    pub notes: String,
    pub attempts: u32,
    /// False for dry runs.
    pub written: bool,
}

// ---------------------------------------------------------------------------
// Updater
// ---------------------------------------------------------------------------

pub struct Updater<S> {
    store: S,
    retry: RetryConfig,
    dry_run: bool,
    sleeper: Box<dyn Fn(Duration)>,
}

impl<S: RecordStore> Updater<S> {
    pub fn new(store: S, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            dry_run: false,
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Compute the new notes without writing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one update stamped with the current UTC time.
    pub fn apply(&self, request: &UpdateRequest) -> Result<UpdateOutcome> {
        let entry = UpdateEntry::now(request.status, request.content.clone());
        self.apply_entry(&request.task_id, entry, request.set_status)
    }

    /// Apply a prepared entry. Retries after a conflicting concurrent write
    /// (re-reading the notes, keeping the entry's timestamp) and after
    /// transient store errors, up to `retry.max_retries` extra attempts.
    pub fn apply_entry(
        &self,
        task_id: &str,
        entry: UpdateEntry,
        set_status: bool,
    ) -> Result<UpdateOutcome> {
        self.run(task_id, &entry, set_status).map_err(|(err, _)| err)
    }

    /// Retry loop behind `apply_entry`; a failure carries the number of
    /// attempts made.
    fn run(
        &self,
        task_id: &str,
        entry: &UpdateEntry,
        set_status: bool,
    ) -> std::result::Result<UpdateOutcome, (NotesyncError, u32)> {
        let mut schedule = self.retry.schedule();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let (err, retry_after) = match self
                .attempt(task_id, entry, set_status)
                .map_err(NotesyncError::into_backoff)
            {
                Ok(mut outcome) => {
                    outcome.attempts = attempts;
                    return Ok(outcome);
                }
                Err(backoff::Error::Permanent(err)) => return Err((err, attempts)),
                Err(backoff::Error::Transient { err, retry_after }) => (err, retry_after),
            };

            let delay = if matches!(err, NotesyncError::Conflict(_)) {
                schedule.immediate()
            } else {
                schedule
                    .next_backoff()
                    .map(|delay| retry_after.map_or(delay, |server| delay.max(server)))
            };
            let Some(delay) = delay else {
                if self.retry.max_retries == 0 {
                    return Err((err, attempts));
                }
                let exhausted = NotesyncError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                };
                return Err((exhausted, attempts));
            };

            warn!(task_id, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying update");
            if !delay.is_zero() {
                (self.sleeper)(delay);
            }
        }
    }

    fn attempt(&self, task_id: &str, entry: &UpdateEntry, set_status: bool) -> Result<UpdateOutcome> {
        let record = self.store.find(task_id)?;
        let notes = append_entry(&record.notes, entry);
        let written = !self.dry_run;
        if written {
            let update = RecordUpdate {
                notes: notes.clone(),
                status: set_status.then_some(entry.status),
            };
            self.store.write(&record, &update)?;
            info!(task_id, record_id = %record.id, status = %entry.status, "notes updated");
        }
        Ok(UpdateOutcome {
            task_id: task_id.to_string(),
            record_id: record.id,
            entry: entry.clone(),
            notes,
            attempts: 1,
            written,
        })
    }

    /// Apply every update in `manifest` in order. A failure is recorded and
    /// the batch carries on.
    pub fn apply_all(&self, manifest: &Manifest) -> SyncReport {
        let results = manifest
            .updates
            .iter()
            .map(|update| {
                let status = update.status();
                let entry = UpdateEntry::now(status, update.content.clone());
                match self.run(&update.task_id, &entry, update.set_status) {
                    Ok(outcome) => SyncResult {
                        task_id: update.task_id.clone(),
                        status,
                        attempts: outcome.attempts,
                        written: outcome.written,
                        error: None,
                    },
                    Err((e, attempts)) => {
                        warn!(task_id = %update.task_id, error = %e, "update failed");
                        SyncResult {
                            task_id: update.task_id.clone(),
                            status,
                            attempts,
                            written: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect();
        SyncReport { results }
    }
}

// ---------------------------------------------------------------------------
// SyncReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub task_id: String,
    pub status: Status,
    pub attempts: u32,
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub results: Vec<SyncResult>,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// "3 updated, 1 failed", or "3 ready, 1 failed" for a dry run.
    pub fn summary(&self) -> String {
        let failed = self.failed();
        let ok = self.results.len() - failed;
        let dry = self.results.iter().any(|r| r.error.is_none() && !r.written);
        let verb = if dry { "ready" } else { "updated" };
        format!("{ok} {verb}, {failed} failed")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::parse_history;
    use crate::store::{MemoryRecordStore, Record};
    use chrono::{TimeZone, Utc};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn entry(status: Status, content: &str, minute: u32) -> UpdateEntry {
        UpdateEntry::new(
            status,
            content,
            Utc.with_ymd_and_hms(2025, 11, 27, 0, minute, 0).unwrap(),
        )
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
        }
    }

    /// Store that edits the notes behind the caller's back before the first
    /// `conflicts` writes.
    struct RacingStore {
        inner: MemoryRecordStore,
        conflicts: Cell<u32>,
    }

    impl RecordStore for RacingStore {
        fn find(&self, task_id: &str) -> Result<Record> {
            self.inner.find(task_id)
        }

        fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()> {
            if self.conflicts.get() > 0 {
                self.conflicts.set(self.conflicts.get() - 1);
                let current = self.inner.get(&record.task_id).unwrap().notes;
                self.inner
                    .set_notes(&record.task_id, format!("human edit\n\n{current}"))?;
            }
            self.inner.write(record, update)
        }
    }

    /// Store whose `find` returns queued errors before succeeding.
    struct FlakyStore {
        inner: MemoryRecordStore,
        errors: RefCell<VecDeque<NotesyncError>>,
        finds: Cell<u32>,
    }

    impl FlakyStore {
        fn new(errors: Vec<NotesyncError>) -> Self {
            let inner = MemoryRecordStore::new();
            inner.insert("T1", "");
            Self {
                inner,
                errors: RefCell::new(errors.into()),
                finds: Cell::new(0),
            }
        }
    }

    impl RecordStore for FlakyStore {
        fn find(&self, task_id: &str) -> Result<Record> {
            self.finds.set(self.finds.get() + 1);
            match self.errors.borrow_mut().pop_front() {
                Some(err) => Err(err),
                None => self.inner.find(task_id),
            }
        }

        fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()> {
            self.inner.write(record, update)
        }
    }

    fn server_error() -> NotesyncError {
        NotesyncError::Api {
            status: 502,
            body: "bad gateway".to_string(),
        }
    }

    #[test]
    fn appends_to_empty_notes_and_sets_status() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "");
        let updater = Updater::new(&store, RetryConfig::none());

        let outcome = updater
            .apply_entry("T1", entry(Status::Done, "Shipped v1", 30), true)
            .unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.record_id, "rec1");

        let stored = store.get("T1").unwrap();
        assert_eq!(
            stored.notes,
            "✅ COMPLETED: 2025-11-27T00:30:00.000000\nShipped v1\n\n"
        );
        assert_eq!(stored.status.as_deref(), Some("Completed"));
    }

    #[test]
    fn keep_status_leaves_field_alone() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "");
        Updater::new(&store, RetryConfig::none())
            .apply_entry("T1", entry(Status::Blocked, "x", 1), false)
            .unwrap();
        assert_eq!(store.get("T1").unwrap().status, None);
    }

    #[test]
    fn sequential_updates_are_newest_first() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "");
        let updater = Updater::new(&store, RetryConfig::none());
        updater
            .apply_entry("T1", entry(Status::InProgress, "first", 1), true)
            .unwrap();
        updater
            .apply_entry("T1", entry(Status::Done, "second", 2), true)
            .unwrap();

        let history = parse_history(&store.get("T1").unwrap().notes);
        let contents: Vec<_> = history.entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
    }

    #[test]
    fn dry_run_does_not_write() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "old");
        let outcome = Updater::new(&store, RetryConfig::none())
            .dry_run(true)
            .apply(&UpdateRequest::new("T1", Status::Planned, "idea"))
            .unwrap();
        assert!(!outcome.written);
        assert!(outcome.notes.ends_with("\nidea\n\nold"));
        assert_eq!(store.get("T1").unwrap().notes, "old");
    }

    #[test]
    fn conflict_rereads_and_preserves_concurrent_edit() {
        let inner = MemoryRecordStore::new();
        inner.insert("T1", "original");
        let store = RacingStore {
            inner,
            conflicts: Cell::new(1),
        };
        let updater = Updater::new(&store, fast_retry(2)).with_sleeper(|_| panic!("no sleep on conflict"));

        let outcome = updater
            .apply_entry("T1", entry(Status::Done, "mine", 3), true)
            .unwrap();
        assert_eq!(outcome.attempts, 2);

        let notes = store.inner.get("T1").unwrap().notes;
        assert!(notes.starts_with("✅ COMPLETED: 2025-11-27T00:03:00.000000\nmine\n\n"));
        assert!(notes.ends_with("human edit\n\noriginal"));
    }

    #[test]
    fn conflicts_exhaust_retries() {
        let inner = MemoryRecordStore::new();
        inner.insert("T1", "");
        let store = RacingStore {
            inner,
            conflicts: Cell::new(10),
        };
        let result = Updater::new(&store, fast_retry(2)).apply_entry("T1", entry(Status::Done, "x", 1), true);
        match result {
            Err(NotesyncError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, NotesyncError::Conflict(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[test]
    fn transient_errors_back_off_then_succeed() {
        let store = FlakyStore::new(vec![server_error(), server_error()]);
        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let recorded = Rc::clone(&sleeps);
        let outcome = Updater::new(&store, fast_retry(3))
            .with_sleeper(move |d| recorded.borrow_mut().push(d))
            .apply_entry("T1", entry(Status::Done, "x", 1), true)
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(store.finds.get(), 3);
        assert_eq!(
            *sleeps.borrow(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn rate_limit_waits_at_least_retry_after() {
        let store = FlakyStore::new(vec![NotesyncError::RateLimited { retry_after_secs: 2 }]);
        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let recorded = Rc::clone(&sleeps);
        Updater::new(&store, fast_retry(1))
            .with_sleeper(move |d| recorded.borrow_mut().push(d))
            .apply_entry("T1", entry(Status::Done, "x", 1), true)
            .unwrap();
        assert_eq!(*sleeps.borrow(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn not_found_is_not_retried() {
        let store = FlakyStore::new(vec![NotesyncError::RecordNotFound("T1".to_string())]);
        let result = Updater::new(&store, fast_retry(3))
            .with_sleeper(|_| {})
            .apply_entry("T1", entry(Status::Done, "x", 1), true);
        assert!(matches!(result, Err(NotesyncError::RecordNotFound(_))));
        assert_eq!(store.finds.get(), 1);
    }

    #[test]
    fn transient_errors_exhaust_retries() {
        let store = FlakyStore::new(vec![server_error(), server_error(), server_error()]);
        let result = Updater::new(&store, fast_retry(2))
            .with_sleeper(|_| {})
            .apply_entry("T1", entry(Status::Done, "x", 1), true);
        assert!(matches!(
            result,
            Err(NotesyncError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(store.inner.get("T1").unwrap().notes, "");
    }

    #[test]
    fn apply_all_continues_past_failures() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "");
        store.insert("T3", "");
        let manifest = Manifest::from_yaml(
            "updates:\n  - task_id: T1\n    status: done\n    content: a\n  - task_id: T2\n    status: done\n    content: b\n  - task_id: T3\n    status: mystery\n    content: c\n",
        )
        .unwrap();

        let report = Updater::new(&store, RetryConfig::none()).apply_all(&manifest);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
        assert_eq!(report.summary(), "2 updated, 1 failed");
        assert!(report.results[1].error.as_deref().unwrap().contains("T2"));
        assert_eq!(report.results[2].status, Status::Planned);
        assert!(store.get("T3").unwrap().notes.starts_with("📋 PLANNED: "));
    }

    #[test]
    fn apply_all_dry_run_writes_nothing() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "old");
        let manifest =
            Manifest::from_yaml("updates:\n  - task_id: T1\n    status: done\n    content: a\n")
                .unwrap();

        let report = Updater::new(&store, RetryConfig::none())
            .dry_run(true)
            .apply_all(&manifest);
        assert!(report.is_success());
        assert!(!report.results[0].written);
        assert_eq!(report.summary(), "1 ready, 0 failed");
        assert_eq!(store.get("T1").unwrap().notes, "old");
    }

    #[test]
    fn apply_all_block_scalar_content_keeps_one_blank_line() {
        let store = MemoryRecordStore::new();
        store.insert("T1", "old");
        let manifest = Manifest::from_yaml(
            "updates:\n  - task_id: T1\n    status: done\n    content: |\n      Shipped v1\n      Docs next\n",
        )
        .unwrap();

        let report = Updater::new(&store, RetryConfig::none()).apply_all(&manifest);
        assert!(report.is_success());

        let notes = store.get("T1").unwrap().notes;
        assert!(notes.starts_with("✅ COMPLETED: "));
        assert!(notes.ends_with("\nShipped v1\nDocs next\n\nold"));
        assert!(!notes.contains("\n\n\n"));
    }

    #[test]
    fn apply_all_reports_attempts_of_failed_updates() {
        let store = FlakyStore::new(vec![server_error(), server_error(), server_error()]);
        store.inner.insert("T2", "");
        let manifest = Manifest::from_yaml(
            "updates:\n  - task_id: T1\n    status: done\n  - task_id: T2\n    status: done\n  - task_id: T9\n    status: done\n",
        )
        .unwrap();

        let report = Updater::new(&store, fast_retry(2))
            .with_sleeper(|_| {})
            .apply_all(&manifest);
        let attempts: Vec<_> = report.results.iter().map(|r| r.attempts).collect();
        assert_eq!(attempts, vec![3, 1, 1]);
        assert!(report.results[0].error.is_some());
        assert!(report.results[1].error.is_none());
        assert!(report.results[2].error.as_deref().unwrap().contains("T9"));
    }
}
