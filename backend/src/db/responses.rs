//! Write path into the evaluation collaborator's `question_responses` table.

use crate::db::{is_constraint_violation, opt_uuid_at, uuid_at};
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub id: Uuid,
    pub participation_id: Uuid,
    pub question_id: Uuid,
    pub answer_text: String,
    pub ocr_source: bool,
    pub scan_upload_id: Option<Uuid>,
}

#[derive(Debug)]
pub enum CreateOutcome {
    Created(StoredResponse),
    /// A response for the pair was already stored; nothing was written.
    Exists(StoredResponse),
}

pub fn find(conn: &Connection, participation_id: Uuid, question_id: Uuid) -> Result<Option<StoredResponse>> {
    let found = conn
        .query_row(
            "SELECT id, participation_id, question_id, answer_text, ocr_source, scan_upload_id
             FROM question_responses WHERE participation_id = ?1 AND question_id = ?2",
            params![participation_id.to_string(), question_id.to_string()],
            |row| {
                Ok(StoredResponse {
                    id: uuid_at(row, 0)?,
                    participation_id: uuid_at(row, 1)?,
                    question_id: uuid_at(row, 2)?,
                    answer_text: row.get(3)?,
                    ocr_source: row.get::<_, i64>(4)? != 0,
                    scan_upload_id: opt_uuid_at(row, 5)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

/// Inserts an OCR-sourced response unless one already exists for the pair.
/// The unique constraint decides; an existing row is returned untouched.
pub fn create_ocr_response(
    conn: &Connection,
    participation_id: Uuid,
    question_id: Uuid,
    answer_text: &str,
    scan_upload_id: Uuid,
) -> Result<CreateOutcome> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let inserted = conn.execute(
        "INSERT INTO question_responses
            (id, participation_id, question_id, answer_text, ocr_source, scan_upload_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
        params![
            id.to_string(),
            participation_id.to_string(),
            question_id.to_string(),
            answer_text,
            scan_upload_id.to_string(),
            now
        ],
    );
    match inserted {
        Ok(_) => Ok(CreateOutcome::Created(StoredResponse {
            id,
            participation_id,
            question_id,
            answer_text: answer_text.to_string(),
            ocr_source: true,
            scan_upload_id: Some(scan_upload_id),
        })),
        Err(e) if is_constraint_violation(&e) => match find(conn, participation_id, question_id)? {
            Some(existing) => Ok(CreateOutcome::Exists(existing)),
            None => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

/// Reviewer-approved overwrite of an existing response with scanned text.
pub fn replace_with_ocr(conn: &Connection, response_id: Uuid, answer_text: &str, scan_upload_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE question_responses
         SET answer_text = ?1, ocr_source = 1, scan_upload_id = ?2, updated_at = ?3
         WHERE id = ?4",
        params![answer_text, scan_upload_id.to_string(), Utc::now(), response_id.to_string()],
    )?;
    Ok(())
}
