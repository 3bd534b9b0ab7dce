use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only payload layout the codec currently emits and accepts.
pub const CURRENT_SCHEMA_VERSION: u8 = 1;

/// Identity stamped on every printed booklet page.
///
/// Built once per page by the booklet composer and recovered from scans by the
/// ingestor. `page_number` is 1-based and never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierPayload {
    pub journey_id: Uuid,
    pub user_id: Uuid,
    pub page_number: u16,
    pub schema_version: u8,
}

impl IdentifierPayload {
    /// Returns `None` for page zero.
    pub fn new(journey_id: Uuid, user_id: Uuid, page_number: u16) -> Option<Self> {
        if page_number == 0 {
            return None;
        }
        Some(Self {
            journey_id,
            user_id,
            page_number,
            schema_version: CURRENT_SCHEMA_VERSION,
        })
    }

    pub fn key(&self) -> PageKey {
        PageKey {
            journey_id: self.journey_id,
            user_id: self.user_id,
            page_number: self.page_number,
        }
    }
}

/// The `(journey, user, page)` triple a page resolves to, independent of how it
/// was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageKey {
    pub journey_id: Uuid,
    pub user_id: Uuid,
    pub page_number: u16,
}
