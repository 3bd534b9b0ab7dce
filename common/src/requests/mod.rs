use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::scan::ConflictResolution;

/// Optional `json` part of a scan upload. Without a participation the upload is
/// treated as a batch spanning any number of participants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    #[serde(default)]
    pub participation_id: Option<Uuid>,
}

/// Reviewer's assignment of a page that could not be matched automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManualTarget {
    /// The short code printed under the symbol, as typed by the operator.
    ShortCode { code: String },
    Direct {
        journey_id: Uuid,
        user_id: Uuid,
        page_number: u16,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    pub action: ConflictResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub reviewer_id: Uuid,
}
