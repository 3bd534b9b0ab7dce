use crate::codec;
use crate::db::{is_constraint_violation, uuid_at};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use common::model::identifier::PageKey;
use common::model::page_code::PageCode;
use rusqlite::{params, Connection, OptionalExtension, Row};

fn page_code_from_row(row: &Row<'_>) -> rusqlite::Result<PageCode> {
    let page_number: i64 = row.get(3)?;
    let created_at: DateTime<Utc> = row.get(4)?;
    Ok(PageCode {
        code: row.get(0)?,
        journey_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        page_number: page_number as u16,
        created_at,
    })
}

pub fn find_by_key(conn: &Connection, key: &PageKey) -> Result<Option<PageCode>> {
    let code = conn
        .query_row(
            "SELECT code, journey_id, user_id, page_number, created_at FROM page_codes
             WHERE journey_id = ?1 AND user_id = ?2 AND page_number = ?3",
            params![
                key.journey_id.to_string(),
                key.user_id.to_string(),
                key.page_number as i64
            ],
            page_code_from_row,
        )
        .optional()?;
    Ok(code)
}

/// Looks up a printed short code. `code` must already be normalised.
pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<PageCode>> {
    let code = conn
        .query_row(
            "SELECT code, journey_id, user_id, page_number, created_at FROM page_codes
             WHERE code = ?1",
            params![code],
            page_code_from_row,
        )
        .optional()?;
    Ok(code)
}

/// Returns the page code for `key`, creating it on first use.
///
/// Reprinting reuses the stored row. Two writers racing on the same triple end
/// up with the same row; a different triple deriving the same code fails with
/// `PageCodeCollision` and nothing is overwritten.
pub fn ensure_page_code(conn: &Connection, key: &PageKey) -> Result<PageCode> {
    if let Some(existing) = find_by_key(conn, key)? {
        return Ok(existing);
    }

    let code = codec::encode_short(key.journey_id, key.user_id, key.page_number);
    let created_at = Utc::now();
    let inserted = conn.execute(
        "INSERT INTO page_codes (code, journey_id, user_id, page_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            code,
            key.journey_id.to_string(),
            key.user_id.to_string(),
            key.page_number as i64,
            created_at
        ],
    );

    match inserted {
        Ok(_) => Ok(PageCode {
            code,
            journey_id: key.journey_id,
            user_id: key.user_id,
            page_number: key.page_number,
            created_at,
        }),
        Err(e) if is_constraint_violation(&e) => match find_by_key(conn, key)? {
            Some(existing) => Ok(existing),
            None => Err(PipelineError::PageCodeCollision { code }),
        },
        Err(e) => Err(e.into()),
    }
}
