use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Canonical task state written into notes headers and the record's status
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Done,
    InProgress,
    Planned,
    Blocked,
}

/// Free-text synonyms accepted for each status, lower case.
const SYNONYMS: &[(&str, Status)] = &[
    ("done", Status::Done),
    ("completed", Status::Done),
    ("in progress", Status::InProgress),
    ("in_progress", Status::InProgress),
    ("todo", Status::Planned),
    ("planned", Status::Planned),
    ("not started", Status::Planned),
    ("blocked", Status::Blocked),
    ("on hold", Status::Blocked),
];

impl Status {
    pub fn all() -> &'static [Status] {
        &[
            Status::Done,
            Status::InProgress,
            Status::Planned,
            Status::Blocked,
        ]
    }

    /// Look up a free-text status, ignoring case and surrounding whitespace.
    /// Returns `None` for text outside the synonym table.
    pub fn lookup(text: &str) -> Option<Status> {
        let key = text.trim().to_lowercase();
        SYNONYMS
            .iter()
            .find(|(synonym, _)| *synonym == key)
            .map(|(_, status)| *status)
    }

    /// Lenient parse used when writing notes: unknown text falls back to
    /// `Planned` so an unrecognized status never aborts an update.
    pub fn parse(text: &str) -> Status {
        Status::lookup(text).unwrap_or(Status::Planned)
    }

    pub fn synonyms(self) -> impl Iterator<Item = &'static str> {
        SYNONYMS
            .iter()
            .filter(move |(_, status)| *status == self)
            .map(|(synonym, _)| *synonym)
    }

    pub fn icon(self) -> &'static str {
        match self {
            Status::Done => "\u{2705}",
            Status::InProgress => "\u{1F504}",
            Status::Planned => "\u{1F4CB}",
            Status::Blocked => "\u{1F6AB}",
        }
    }

    /// Upper-case text used in notes headers.
    pub fn canonical(self) -> &'static str {
        match self {
            Status::Done => "COMPLETED",
            Status::InProgress => "IN PROGRESS",
            Status::Planned => "PLANNED",
            Status::Blocked => "BLOCKED",
        }
    }

    /// Inverse of [`Status::canonical`].
    pub fn from_canonical(text: &str) -> Option<Status> {
        Status::all().iter().copied().find(|s| s.canonical() == text)
    }

    /// Value written to the record store's status field.
    pub fn field_value(self) -> &'static str {
        match self {
            Status::Done => "Completed",
            Status::InProgress => "In Progress",
            Status::Planned => "Planned",
            Status::Blocked => "Blocked",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Done => "done",
            Status::InProgress => "in_progress",
            Status::Planned => "planned",
            Status::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse: unknown text is an error. Use [`Status::parse`] for the
/// default-to-Planned behavior.
impl std::str::FromStr for Status {
    type Err = crate::error::NotesyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::lookup(s).ok_or_else(|| crate::error::NotesyncError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
