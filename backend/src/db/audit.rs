//! Best-effort audit trail.
//!
//! Audit writes run on their own blocking task and can never fail the
//! operation that triggered them; errors are only logged.

use crate::db::Database;
use crate::error::Result;
use chrono::Utc;
use log::warn;
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

pub fn insert_event(db: &Database, kind: &str, subject_id: Uuid, detail: &Value) -> Result<()> {
    let conn = db.open()?;
    conn.execute(
        "INSERT INTO audit_events (id, kind, subject_id, detail, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            Uuid::new_v4().to_string(),
            kind,
            subject_id.to_string(),
            detail.to_string(),
            Utc::now()
        ],
    )?;
    Ok(())
}

/// Records an event without waiting for it. Outside a tokio runtime the write
/// happens inline, still without surfacing errors.
pub fn record(db: &Database, kind: &'static str, subject_id: Uuid, detail: Value) {
    let db = db.clone();
    let write = move || {
        if let Err(e) = insert_event(&db, kind, subject_id, &detail) {
            warn!("Audit event '{}' for {} was not stored: {}", kind, subject_id, e);
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(write);
        }
        Err(_) => write(),
    }
}
