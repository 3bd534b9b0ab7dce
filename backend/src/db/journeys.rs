//! Read-only view of the journey collaborator: question order, participants
//! and participation lookup.

use crate::db::{uuid_at, Database};
use crate::error::{PipelineError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyQuestion {
    pub id: Uuid,
    pub order_index: i64,
    pub prompt: String,
    /// Physical pages reserved for this question in a booklet, at least 1.
    pub expected_pages: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub participation_id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
}

#[derive(Debug, Clone)]
pub struct Journey {
    pub id: Uuid,
    pub title: String,
    pub questions: Vec<JourneyQuestion>,
}

pub fn load_journey(conn: &Connection, journey_id: Uuid) -> Result<Journey> {
    let title: Option<String> = conn
        .query_row(
            "SELECT title FROM journeys WHERE id = ?1",
            params![journey_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let title = title.ok_or_else(|| PipelineError::NotFound(format!("journey {}", journey_id)))?;
    Ok(Journey {
        id: journey_id,
        title,
        questions: questions(conn, journey_id)?,
    })
}

/// Questions in booklet order.
pub fn questions(conn: &Connection, journey_id: Uuid) -> Result<Vec<JourneyQuestion>> {
    let mut stmt = conn.prepare(
        "SELECT id, order_index, prompt, expected_pages FROM journey_questions
         WHERE journey_id = ?1 ORDER BY order_index, id",
    )?;
    let rows = stmt.query_map(params![journey_id.to_string()], |row| {
        let expected: i64 = row.get(3)?;
        Ok(JourneyQuestion {
            id: uuid_at(row, 0)?,
            order_index: row.get(1)?,
            prompt: row.get(2)?,
            expected_pages: expected.clamp(1, u16::MAX as i64) as u16,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Participants assigned to a journey, in print order.
pub fn participants(conn: &Connection, journey_id: Uuid) -> Result<Vec<Participant>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.user_id, u.full_name FROM participations p
         JOIN users u ON u.id = p.user_id
         WHERE p.journey_id = ?1 ORDER BY u.full_name, p.user_id",
    )?;
    let rows = stmt.query_map(params![journey_id.to_string()], |row| {
        Ok(Participant {
            participation_id: uuid_at(row, 0)?,
            user_id: uuid_at(row, 1)?,
            full_name: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn participation_for(conn: &Connection, journey_id: Uuid, user_id: Uuid) -> Result<Option<Uuid>> {
    let id = conn
        .query_row(
            "SELECT id FROM participations WHERE journey_id = ?1 AND user_id = ?2",
            params![journey_id.to_string(), user_id.to_string()],
            |row| uuid_at(row, 0),
        )
        .optional()?;
    Ok(id)
}

pub fn participation_exists(db: &Database, participation_id: Uuid) -> Result<bool> {
    let conn = db.open()?;
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM participations WHERE id = ?1",
            params![participation_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
