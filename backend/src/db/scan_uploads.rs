//! `scan_uploads` rows and their status transitions.
//!
//! Each transition is a single conditional UPDATE on the expected current
//! status, so two workers can never both own an upload and a `processed` row
//! always carries its report.

use crate::db::{opt_uuid_at, uuid_at};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use common::model::scan::{ExtractedResponse, ImportReport, ScanStatus, ScanUpload};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::time::Duration;
use uuid::Uuid;

pub struct NewScanUpload {
    pub id: Uuid,
    pub participation_id: Option<Uuid>,
    pub file_path: String,
    pub original_filename: String,
    pub content_md5: String,
}

const COLUMNS: &str = "id, participation_id, file_path, original_filename, content_md5, status,
    extracted_responses, import_report, error_message, reviewed_by,
    created_at, updated_at, processed_at, reviewed_at";

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<ScanUpload> {
    let status: String = row.get(5)?;
    let status = ScanStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, format!("unknown status '{}'", status).into())
    })?;
    Ok(ScanUpload {
        id: uuid_at(row, 0)?,
        participation_id: opt_uuid_at(row, 1)?,
        file_path: row.get(2)?,
        original_filename: row.get(3)?,
        content_md5: row.get(4)?,
        status,
        extracted_responses: json_column(row, 6)?,
        import_report: json_column(row, 7)?,
        error_message: row.get(8)?,
        reviewed_by: opt_uuid_at(row, 9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        processed_at: row.get::<_, Option<DateTime<Utc>>>(12)?,
        reviewed_at: row.get::<_, Option<DateTime<Utc>>>(13)?,
    })
}

pub fn insert(conn: &Connection, new: NewScanUpload) -> Result<ScanUpload> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO scan_uploads
            (id, participation_id, file_path, original_filename, content_md5, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            new.id.to_string(),
            new.participation_id.map(|p| p.to_string()),
            new.file_path,
            new.original_filename,
            new.content_md5,
            ScanStatus::Uploaded.as_str(),
            now
        ],
    )?;
    get(conn, new.id)
}

pub fn get(conn: &Connection, id: Uuid) -> Result<ScanUpload> {
    let sql = format!("SELECT {} FROM scan_uploads WHERE id = ?1", COLUMNS);
    conn.query_row(&sql, params![id.to_string()], upload_from_row)
        .optional()?
        .ok_or_else(|| PipelineError::NotFound(format!("scan upload {}", id)))
}

fn transition_error(conn: &Connection, id: Uuid, wanted: &str) -> PipelineError {
    match get(conn, id) {
        Ok(upload) if upload.status == ScanStatus::Processing && wanted == "claim" => {
            PipelineError::AlreadyClaimed(id.to_string())
        }
        Ok(upload) => PipelineError::InvalidState(format!(
            "cannot {} upload {} in status {}",
            wanted,
            id,
            upload.status.as_str()
        )),
        Err(e) => e,
    }
}

/// Atomic `uploaded -> processing`. Fails if another task got there first.
pub fn claim(conn: &Connection, id: Uuid) -> Result<()> {
    let changed = conn.execute(
        "UPDATE scan_uploads SET status = 'processing', updated_at = ?1
         WHERE id = ?2 AND status = 'uploaded'",
        params![Utc::now(), id.to_string()],
    )?;
    if changed == 1 {
        Ok(())
    } else {
        Err(transition_error(conn, id, "claim"))
    }
}

/// Returns an interrupted `processing` upload to `uploaded` so it can be retried.
pub fn release_claim(conn: &Connection, id: Uuid) -> Result<()> {
    let changed = conn.execute(
        "UPDATE scan_uploads SET status = 'uploaded', updated_at = ?1
         WHERE id = ?2 AND status = 'processing'",
        params![Utc::now(), id.to_string()],
    )?;
    if changed == 1 {
        Ok(())
    } else {
        Err(transition_error(conn, id, "release"))
    }
}

/// Releases a `processing` upload whose worker has gone quiet for longer than
/// `lease`. A claim that is still being refreshed stays put.
pub fn release_stale_claim(conn: &Connection, id: Uuid, lease: Duration) -> Result<()> {
    let now = Utc::now();
    let lease_secs = lease.as_secs().min(u32::MAX as u64) as i64;
    let cutoff = now - chrono::Duration::seconds(lease_secs);
    let changed = conn.execute(
        "UPDATE scan_uploads SET status = 'uploaded', updated_at = ?1
         WHERE id = ?2 AND status = 'processing' AND updated_at < ?3",
        params![now, id.to_string(), cutoff],
    )?;
    if changed == 1 {
        return Ok(());
    }
    match get(conn, id)? {
        upload if upload.status == ScanStatus::Processing => Err(PipelineError::InvalidState(
            format!("upload {} is still being processed", id),
        )),
        _ => Err(transition_error(conn, id, "release")),
    }
}

/// Worker heartbeat: keeps a live claim from looking abandoned.
pub fn touch_claim(conn: &Connection, id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE scan_uploads SET updated_at = ?1 WHERE id = ?2 AND status = 'processing'",
        params![Utc::now(), id.to_string()],
    )?;
    Ok(changed == 1)
}

pub fn mark_processed(
    conn: &Connection,
    id: Uuid,
    report: &ImportReport,
    responses: &[ExtractedResponse],
) -> Result<()> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE scan_uploads
         SET status = 'processed', import_report = ?1, extracted_responses = ?2,
             error_message = NULL, processed_at = ?3, updated_at = ?3
         WHERE id = ?4 AND status = 'processing'",
        params![
            serde_json::to_string(report)?,
            serde_json::to_string(responses)?,
            now,
            id.to_string()
        ],
    )?;
    if changed == 1 {
        Ok(())
    } else {
        Err(transition_error(conn, id, "complete"))
    }
}

/// Upload-level failure. No report is stored.
pub fn mark_error(conn: &Connection, id: Uuid, message: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE scan_uploads
         SET status = 'error', error_message = ?1, import_report = NULL, updated_at = ?2
         WHERE id = ?3 AND status = 'processing'",
        params![message, Utc::now(), id.to_string()],
    )?;
    if changed == 1 {
        Ok(())
    } else {
        Err(transition_error(conn, id, "fail"))
    }
}

/// Stores a report amended by a reviewer. Only while the upload is `processed`.
pub fn update_review_data(
    conn: &Connection,
    id: Uuid,
    report: &ImportReport,
    responses: &[ExtractedResponse],
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE scan_uploads SET import_report = ?1, extracted_responses = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'processed'",
        params![
            serde_json::to_string(report)?,
            serde_json::to_string(responses)?,
            Utc::now(),
            id.to_string()
        ],
    )?;
    if changed == 1 {
        Ok(())
    } else {
        Err(transition_error(conn, id, "amend"))
    }
}

pub fn mark_reviewed(conn: &Connection, id: Uuid, reviewer_id: Uuid) -> Result<()> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE scan_uploads SET status = 'reviewed', reviewed_by = ?1, reviewed_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = 'processed'",
        params![reviewer_id.to_string(), now, id.to_string()],
    )?;
    if changed == 1 {
        Ok(())
    } else {
        Err(transition_error(conn, id, "review"))
    }
}
