//! Notes history: newest-first update entries stored in a single text field.
//!
//! Each entry is a header line followed by its content:
//!
//! ```text
//! ✅ COMPLETED: 2025-11-27T00:30:00.000000
//! Shipped v1
//!
//! 🔄 IN PROGRESS: 2025-11-20T09:00:00.000000
//! Training run 3 started
//!
//! ```
//!
//! Appending never edits existing text: the previous blob is always a suffix
//! of the new one.

use crate::status::Status;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Blank line placed after every entry.
pub const SEPARATOR: &str = "\n\n";

/// Header timestamps are UTC, rendered without an offset suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

// ---------------------------------------------------------------------------
// UpdateEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl UpdateEntry {
    pub fn new(status: Status, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            timestamp,
            content: content.into(),
        }
    }

    /// Entry stamped with the current UTC time.
    pub fn now(status: Status, content: impl Into<String>) -> Self {
        Self::new(status, content, Utc::now())
    }

    pub fn header(&self) -> String {
        format!(
            "{} {}: {}",
            self.status.icon(),
            self.status.canonical(),
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }

    /// Header and content, without the trailing separator.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.header(), self.content)
    }
}

// ---------------------------------------------------------------------------
// Appending
// ---------------------------------------------------------------------------

/// Place `entry` in front of `existing`. The separator is always written, so
/// an empty field ends up holding exactly one entry.
pub fn append_entry(existing: &str, entry: &UpdateEntry) -> String {
    let rendered = entry.render();
    let mut out = String::with_capacity(rendered.len() + SEPARATOR.len() + existing.len());
    out.push_str(&rendered);
    out.push_str(SEPARATOR);
    out.push_str(existing);
    out
}

/// Append a free-text status update stamped with the current time.
/// Unknown statuses are recorded as planned.
pub fn append(status: &str, content: &str, existing: &str) -> String {
    append_entry(existing, &UpdateEntry::now(Status::parse(status), content))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Entries recovered from a notes field, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotesHistory {
    pub entries: Vec<UpdateEntry>,
    /// Text above the newest header.
    pub leading: Option<String>,
    /// Text after the oldest entry's first blank line, typically notes that
    /// were written by hand before any entry was appended.
    pub trailing: Option<String>,
}

impl NotesHistory {
    pub fn latest(&self) -> Option<&UpdateEntry> {
        self.entries.first()
    }
}

static HEADER_RE: OnceLock<Regex> = OnceLock::new();

fn header_re() -> &'static Regex {
    HEADER_RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?:\x{2705}|\x{1F504}|\x{1F4CB}|\x{1F6AB}) (COMPLETED|IN PROGRESS|PLANNED|BLOCKED): (\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?)$",
        )
        .unwrap()
    })
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

struct Header {
    start: usize,
    end: usize,
    status: Status,
    timestamp: DateTime<Utc>,
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Split a notes field into its entries.
///
/// An entry's content runs until the next header. The oldest entry has no
/// following header, so its content stops at its first blank line and
/// anything after that is reported as `trailing`.
///
/// A line inside an entry's content that has the exact shape of a header
/// starts a new entry. The stored notes are unaffected; only the parsed view
/// splits.
pub fn parse_history(notes: &str) -> NotesHistory {
    let headers: Vec<Header> = header_re()
        .captures_iter(notes)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let status = Status::from_canonical(caps.get(1)?.as_str())?;
            let timestamp = parse_timestamp(caps.get(2)?.as_str())?;
            Some(Header {
                start: whole.start(),
                end: whole.end(),
                status,
                timestamp,
            })
        })
        .collect();

    let Some(first) = headers.first() else {
        return NotesHistory {
            entries: Vec::new(),
            leading: non_empty(notes),
            trailing: None,
        };
    };

    let mut history = NotesHistory {
        leading: non_empty(&notes[..first.start]),
        ..NotesHistory::default()
    };

    for (i, header) in headers.iter().enumerate() {
        let body_start = (header.end + 1).min(notes.len());
        let content = match headers.get(i + 1) {
            Some(next) => {
                let body = &notes[body_start..next.start.max(body_start)];
                body.strip_suffix(SEPARATOR)
                    .or_else(|| body.strip_suffix('\n'))
                    .unwrap_or(body)
                    .to_string()
            }
            None => {
                let body = &notes[body_start..];
                match body.split_once(SEPARATOR) {
                    Some((content, rest)) => {
                        history.trailing = non_empty(rest);
                        content.to_string()
                    }
                    None => body.trim_end_matches('\n').to_string(),
                }
            }
        };
        history
            .entries
            .push(UpdateEntry::new(header.status, content, header.timestamp));
    }

    history
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
