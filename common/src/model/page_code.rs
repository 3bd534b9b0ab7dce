use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::identifier::PageKey;

/// Persisted mapping from the printed short code to a booklet page.
///
/// Rows are written once at print time and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCode {
    pub code: String,
    pub journey_id: Uuid,
    pub user_id: Uuid,
    pub page_number: u16,
    pub created_at: DateTime<Utc>,
}

impl PageCode {
    pub fn key(&self) -> PageKey {
        PageKey {
            journey_id: self.journey_id,
            user_id: self.user_id,
            page_number: self.page_number,
        }
    }
}
