//! Scan upload records and the import report stored on them.
//!
//! A `ScanUpload` moves through `Uploaded -> Processing -> Processed -> Reviewed`,
//! with `Error` reachable from `Processing` when the uploaded file itself cannot
//! be read. Page-level problems never move the upload to `Error`; they are
//! recorded as entries of the `ImportReport`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::identifier::PageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Uploaded,
    Processing,
    Processed,
    Reviewed,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Uploaded => "uploaded",
            ScanStatus::Processing => "processing",
            ScanStatus::Processed => "processed",
            ScanStatus::Reviewed => "reviewed",
            ScanStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploaded" => Some(ScanStatus::Uploaded),
            "processing" => Some(ScanStatus::Processing),
            "processed" => Some(ScanStatus::Processed),
            "reviewed" => Some(ScanStatus::Reviewed),
            "error" => Some(ScanStatus::Error),
            _ => None,
        }
    }
}

/// One uploaded scan or photo batch.
///
/// `participation_id` is `None` for batch uploads that span several
/// participants of a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanUpload {
    pub id: Uuid,
    pub participation_id: Option<Uuid>,
    pub file_path: String,
    pub original_filename: String,
    pub content_md5: String,
    pub status: ScanStatus,
    pub extracted_responses: Option<Vec<ExtractedResponse>>,
    pub import_report: Option<ImportReport>,
    pub error_message: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// A `QuestionResponse` the pipeline created (or replaced) from this upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedResponse {
    pub participation_id: Uuid,
    pub question_id: Uuid,
    pub answer_text: String,
    /// Physical page indexes the answer was read from, in order.
    pub pages: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeStatus {
    Decoded,
    Manual,
    Unresolved,
    Conflict,
}

/// How an automatically decoded page was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePath {
    Direct,
    Deskewed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepExisting,
    ReplaceExisting,
}

/// Outcome for one physical page of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPage {
    /// 1-based position of the page inside the uploaded document.
    pub page_index: u32,
    pub decode_status: DecodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_path: Option<DecodePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<Uuid>,
    #[serde(default)]
    pub attributed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why a page is in conflict. Conflicts are outcomes, not errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl ReportPage {
    pub fn unresolved(page_index: u32, error: Option<String>) -> Self {
        Self {
            page_index,
            decode_status: DecodeStatus::Unresolved,
            decode_path: None,
            journey_id: None,
            user_id: None,
            page_number: None,
            participation_id: None,
            question_id: None,
            attributed: false,
            error,
            note: None,
            resolution: None,
        }
    }

    pub fn resolved(page_index: u32, key: PageKey, status: DecodeStatus) -> Self {
        Self {
            page_index,
            decode_status: status,
            decode_path: None,
            journey_id: Some(key.journey_id),
            user_id: Some(key.user_id),
            page_number: Some(key.page_number),
            participation_id: None,
            question_id: None,
            attributed: false,
            error: None,
            note: None,
            resolution: None,
        }
    }

    pub fn key(&self) -> Option<PageKey> {
        match (self.journey_id, self.user_id, self.page_number) {
            (Some(journey_id), Some(user_id), Some(page_number)) => Some(PageKey {
                journey_id,
                user_id,
                page_number,
            }),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self.decode_status,
            DecodeStatus::Decoded | DecodeStatus::Manual
        )
    }

    /// Unresolved pages, open conflicts and pages carrying an error need a
    /// reviewer before the upload is signed off.
    pub fn needs_attention(&self) -> bool {
        match self.decode_status {
            DecodeStatus::Unresolved => true,
            DecodeStatus::Conflict => self.resolution.is_none(),
            DecodeStatus::Decoded | DecodeStatus::Manual => self.error.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_pages: u32,
    pub resolved: u32,
    pub unresolved: u32,
    pub conflicts: u32,
    pub attributed: u32,
    pub errors: u32,
}

/// Per-page audit trail of one ingestion, ordered by `page_index`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub pages: Vec<ReportPage>,
    pub summary: ReportSummary,
}

impl ImportReport {
    /// Builds a report from page entries, sorting them and computing the summary.
    pub fn from_pages(mut pages: Vec<ReportPage>) -> Self {
        pages.sort_by_key(|p| p.page_index);
        let mut report = Self {
            pages,
            summary: ReportSummary::default(),
        };
        report.refresh_summary();
        report
    }

    pub fn refresh_summary(&mut self) {
        let mut summary = ReportSummary {
            total_pages: self.pages.len() as u32,
            ..ReportSummary::default()
        };
        for page in &self.pages {
            match page.decode_status {
                DecodeStatus::Decoded | DecodeStatus::Manual => summary.resolved += 1,
                DecodeStatus::Unresolved => summary.unresolved += 1,
                DecodeStatus::Conflict => summary.conflicts += 1,
            }
            if page.attributed {
                summary.attributed += 1;
            }
            if page.error.is_some() {
                summary.errors += 1;
            }
        }
        self.summary = summary;
    }

    pub fn page(&self, page_index: u32) -> Option<&ReportPage> {
        self.pages.iter().find(|p| p.page_index == page_index)
    }

    pub fn page_mut(&mut self, page_index: u32) -> Option<&mut ReportPage> {
        self.pages.iter_mut().find(|p| p.page_index == page_index)
    }

    pub fn pending_attention(&self) -> usize {
        self.pages.iter().filter(|p| p.needs_attention()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page_number: u16) -> PageKey {
        PageKey {
            journey_id: Uuid::nil(),
            user_id: Uuid::nil(),
            page_number,
        }
    }

    #[test]
    fn summary_counts_each_outcome() {
        let mut decoded = ReportPage::resolved(2, key(1), DecodeStatus::Decoded);
        decoded.attributed = true;
        let mut conflict = ReportPage::resolved(3, key(2), DecodeStatus::Conflict);
        conflict.note = Some("a response to this question already exists".into());
        decoded.error = Some("text extraction failed".into());
        let report = ImportReport::from_pages(vec![
            conflict,
            ReportPage::unresolved(1, None),
            decoded,
        ]);

        let pages: Vec<u32> = report.pages.iter().map(|p| p.page_index).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(
            report.summary,
            ReportSummary {
                total_pages: 3,
                resolved: 1,
                unresolved: 1,
                conflicts: 1,
                attributed: 1,
                errors: 1,
            }
        );
        // Unresolved page, open conflict and the decoded page with an error.
        assert_eq!(report.pending_attention(), 3);
    }

    #[test]
    fn report_json_uses_lowercase_statuses() {
        let report = ImportReport::from_pages(vec![ReportPage::unresolved(1, None)]);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"decode_status\":\"unresolved\""));
        assert!(!json.contains("question_id"));
    }
}
