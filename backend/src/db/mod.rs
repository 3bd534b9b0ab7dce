//! SQLite persistence.
//!
//! The pipeline owns `page_codes`, `scan_uploads` and `audit_events`. The
//! journey, user, participation and response tables belong to the surrounding
//! assessment system; they are declared here so the pipeline's reads and its
//! `question_responses` writes have a schema to run against.

pub mod audit;
pub mod journeys;
pub mod page_codes;
pub mod responses;
pub mod scan_uploads;

use crate::error::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS journeys (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS journey_questions (
    id TEXT PRIMARY KEY,
    journey_id TEXT NOT NULL REFERENCES journeys(id) ON DELETE CASCADE,
    order_index INTEGER NOT NULL,
    prompt TEXT NOT NULL,
    expected_pages INTEGER NOT NULL DEFAULT 1 CHECK (expected_pages >= 1)
);

CREATE TABLE IF NOT EXISTS participations (
    id TEXT PRIMARY KEY,
    journey_id TEXT NOT NULL REFERENCES journeys(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id),
    UNIQUE (journey_id, user_id)
);

CREATE TABLE IF NOT EXISTS question_responses (
    id TEXT PRIMARY KEY,
    participation_id TEXT NOT NULL REFERENCES participations(id) ON DELETE CASCADE,
    question_id TEXT NOT NULL REFERENCES journey_questions(id) ON DELETE CASCADE,
    answer_text TEXT NOT NULL,
    ocr_source INTEGER NOT NULL DEFAULT 0,
    time_spent_seconds INTEGER,
    scan_upload_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (participation_id, question_id)
);

CREATE TABLE IF NOT EXISTS page_codes (
    code TEXT PRIMARY KEY,
    journey_id TEXT NOT NULL REFERENCES journeys(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    page_number INTEGER NOT NULL CHECK (page_number >= 1),
    created_at TEXT NOT NULL,
    UNIQUE (journey_id, user_id, page_number)
);

CREATE TABLE IF NOT EXISTS scan_uploads (
    id TEXT PRIMARY KEY,
    participation_id TEXT REFERENCES participations(id) ON DELETE SET NULL,
    file_path TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    content_md5 TEXT NOT NULL,
    status TEXT NOT NULL,
    extracted_responses TEXT,
    import_report TEXT,
    error_message TEXT,
    reviewed_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    processed_at TEXT,
    reviewed_at TEXT
);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Handle to the SQLite file. Cheap to clone; every operation opens its own
/// connection so blocking workers never share one.
#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Creates missing tables. Safe to call on every start.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Uuid::parse_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
