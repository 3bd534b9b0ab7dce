//! Reviewer actions on a processed upload.
//!
//! Every action reloads the stored report, changes it and writes it back
//! inside one immediate transaction. Two reviewers working on the same upload
//! are serialized, and an upload that left `processed` in the meantime is
//! never amended.

use crate::codec::normalize_short;
use crate::config::StorageConfig;
use crate::db::page_codes::find_by_code;
use crate::db::{audit, responses, scan_uploads, Database};
use crate::error::{PipelineError, Result};
use crate::extract::TextExtractor;
use crate::reconcile::engine::upsert_response;
use crate::reconcile::{Attributor, StoredPages};
use common::model::identifier::PageKey;
use common::model::scan::{
    ConflictResolution, DecodeStatus, ExtractedResponse, ImportReport, ReportPage, ScanStatus,
    ScanUpload,
};
use common::requests::ManualTarget;
use log::info;
use rusqlite::{Connection, TransactionBehavior};
use std::time::Duration;
use serde_json::json;
use uuid::Uuid;

fn processed_upload(conn: &Connection, upload_id: Uuid) -> Result<(ScanUpload, ImportReport)> {
    let upload = scan_uploads::get(conn, upload_id)?;
    if upload.status != ScanStatus::Processed {
        return Err(PipelineError::InvalidState(format!(
            "upload {} is {}, review actions need a processed upload",
            upload_id,
            upload.status.as_str()
        )));
    }
    let report = upload
        .import_report
        .clone()
        .ok_or_else(|| PipelineError::InvalidState(format!("upload {} has no report", upload_id)))?;
    Ok((upload, report))
}

fn page_not_found(upload_id: Uuid, page_index: u32) -> PipelineError {
    PipelineError::NotFound(format!("page {} of upload {}", page_index, upload_id))
}

fn target_key(conn: &Connection, target: &ManualTarget) -> Result<PageKey> {
    match target {
        ManualTarget::ShortCode { code } => {
            let normalized = normalize_short(code)
                .ok_or_else(|| PipelineError::BadRequest(format!("'{}' is not a page code", code)))?;
            let page_code = find_by_code(conn, &normalized)?
                .ok_or_else(|| PipelineError::NotFound(format!("page code {}", normalized)))?;
            Ok(page_code.key())
        }
        ManualTarget::Direct {
            journey_id,
            user_id,
            page_number,
        } => {
            if *page_number == 0 {
                return Err(PipelineError::BadRequest("page numbers start at 1".into()));
            }
            Ok(PageKey {
                journey_id: *journey_id,
                user_id: *user_id,
                page_number: *page_number,
            })
        }
    }
}

/// Assigns an identity to a page by hand and re-runs attribution for the
/// question it lands on.
pub fn resolve_page(
    db: &Database,
    storage: &StorageConfig,
    extractor: &dyn TextExtractor,
    upload_id: Uuid,
    page_index: u32,
    target: &ManualTarget,
) -> Result<ScanUpload> {
    let mut conn = db.open()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (upload, mut report) = processed_upload(&tx, upload_id)?;
    let key = target_key(&tx, target)?;

    let page = report
        .page(page_index)
        .ok_or_else(|| page_not_found(upload_id, page_index))?;
    if page.attributed {
        return Err(PipelineError::InvalidState(format!(
            "page {} is already attributed",
            page_index
        )));
    }
    if let Some(other) = report
        .pages
        .iter()
        .find(|p| p.page_index != page_index && p.is_resolved() && p.key() == Some(key))
    {
        return Err(PipelineError::InvalidState(format!(
            "page {} already carries this identity",
            other.page_index
        )));
    }

    let page = report
        .page_mut(page_index)
        .ok_or_else(|| page_not_found(upload_id, page_index))?;
    *page = ReportPage::resolved(page_index, key, DecodeStatus::Manual);

    let mut extracted = upload.extracted_responses.clone().unwrap_or_default();
    let images = StoredPages::for_upload(&storage.upload_dir, upload_id);
    Attributor {
        conn: &tx,
        upload: &upload,
        images: &images,
        extractor,
    }
    .identity(
        &mut report,
        key.journey_id,
        key.user_id,
        Some(page_index),
        &mut extracted,
    )?;
    report.refresh_summary();
    scan_uploads::update_review_data(&tx, upload_id, &report, &extracted)?;
    tx.commit()?;

    info!(
        "Upload {}: page {} manually assigned to page {} of user {}",
        upload_id, page_index, key.page_number, key.user_id
    );
    audit::record(
        db,
        "scan.page_resolved",
        upload_id,
        json!({
            "page_index": page_index,
            "journey_id": key.journey_id,
            "user_id": key.user_id,
            "page_number": key.page_number,
        }),
    );
    scan_uploads::get(&conn, upload_id)
}

/// Settles an open conflict.
///
/// `keep_existing` leaves the stored response alone. `replace_existing`
/// overwrites it with the text read from the conflicting question's pages;
/// duplicate pages inside one upload can only be kept out.
pub fn resolve_conflict(
    db: &Database,
    storage: &StorageConfig,
    extractor: &dyn TextExtractor,
    upload_id: Uuid,
    page_index: u32,
    action: ConflictResolution,
) -> Result<ScanUpload> {
    let mut conn = db.open()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (upload, mut report) = processed_upload(&tx, upload_id)?;

    let page = report
        .page(page_index)
        .ok_or_else(|| page_not_found(upload_id, page_index))?;
    if page.decode_status != DecodeStatus::Conflict || page.resolution.is_some() {
        return Err(PipelineError::InvalidState(format!(
            "page {} has no open conflict",
            page_index
        )));
    }

    let subject = page.participation_id.zip(page.question_id);
    let group: Vec<usize> = match subject {
        Some((participation_id, question_id)) => report
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.decode_status == DecodeStatus::Conflict
                    && p.resolution.is_none()
                    && p.participation_id == Some(participation_id)
                    && p.question_id == Some(question_id)
            })
            .map(|(i, _)| i)
            .collect(),
        None => report
            .pages
            .iter()
            .position(|p| p.page_index == page_index)
            .into_iter()
            .collect(),
    };

    let mut extracted = upload.extracted_responses.clone().unwrap_or_default();
    match (action, subject) {
        (ConflictResolution::KeepExisting, _) => {
            for &i in &group {
                report.pages[i].resolution = Some(ConflictResolution::KeepExisting);
            }
        }
        (ConflictResolution::ReplaceExisting, None) => {
            return Err(PipelineError::BadRequest(format!(
                "page {} duplicates another page of this upload and cannot replace a response",
                page_index
            )));
        }
        (ConflictResolution::ReplaceExisting, Some((participation_id, question_id))) => {
            let mut group = group;
            group.sort_by_key(|&i| (report.pages[i].page_number, report.pages[i].page_index));
            let page_indexes: Vec<u32> = group.iter().map(|&i| report.pages[i].page_index).collect();
            let images = StoredPages::for_upload(&storage.upload_dir, upload_id);
            let attributor = Attributor {
                conn: &tx,
                upload: &upload,
                images: &images,
                extractor,
            };
            for &i in &group {
                report.pages[i].error = None;
            }
            // On failure the errors are on the pages and the conflict stays open.
            if let Some(answer_text) = attributor.extract_text(&mut report, &group, &page_indexes) {
                let existing = responses::find(&tx, participation_id, question_id)?
                    .ok_or_else(|| {
                        PipelineError::InvalidState(
                            "the conflicting response no longer exists".into(),
                        )
                    })?;
                responses::replace_with_ocr(&tx, existing.id, &answer_text, upload_id)?;
                for &i in &group {
                    let page = &mut report.pages[i];
                    page.resolution = Some(ConflictResolution::ReplaceExisting);
                    page.attributed = true;
                }
                upsert_response(
                    &mut extracted,
                    ExtractedResponse {
                        participation_id,
                        question_id,
                        answer_text,
                        pages: page_indexes,
                    },
                );
            }
        }
    }

    report.refresh_summary();
    scan_uploads::update_review_data(&tx, upload_id, &report, &extracted)?;
    tx.commit()?;
    info!(
        "Upload {}: conflict on page {} settled with {:?}",
        upload_id, page_index, action
    );
    audit::record(
        db,
        "scan.conflict_resolved",
        upload_id,
        json!({ "page_index": page_index, "action": action }),
    );
    scan_uploads::get(&conn, upload_id)
}

/// Signs off a processed upload. Unsettled pages do not block the sign-off;
/// they stay visible in the report.
pub fn mark_reviewed(db: &Database, upload_id: Uuid, reviewer_id: Uuid) -> Result<ScanUpload> {
    let conn = db.open()?;
    scan_uploads::mark_reviewed(&conn, upload_id, reviewer_id)?;
    audit::record(
        db,
        "scan.reviewed",
        upload_id,
        json!({ "reviewer_id": reviewer_id }),
    );
    scan_uploads::get(&conn, upload_id)
}

/// Puts an interrupted upload back in the queue. Only a claim whose worker
/// has not checked in for `lease` counts as interrupted.
pub fn release(db: &Database, upload_id: Uuid, lease: Duration) -> Result<ScanUpload> {
    let conn = db.open()?;
    scan_uploads::release_stale_claim(&conn, upload_id, lease)?;
    info!("Upload {} released for another ingestion attempt", upload_id);
    scan_uploads::get(&conn, upload_id)
}
