//! Reviewer actions on a processed upload. Every route answers with the
//! updated `ScanUpload` so the client can redraw the report.

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::Result;
use crate::extract::TextExtractor;
use crate::reconcile::review;
use crate::services::blocking;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use common::model::scan::ScanUpload;
use common::requests::{ManualTarget, ResolveConflictRequest, ReviewRequest};
use uuid::Uuid;

fn respond(result: Result<ScanUpload>) -> HttpResponse {
    match result {
        Ok(upload) => HttpResponse::Ok().json(upload),
        Err(e) => e.error_response(),
    }
}

pub(crate) async fn resolve(
    path: web::Path<(Uuid, u32)>,
    target: web::Json<ManualTarget>,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    extractor: web::Data<dyn TextExtractor>,
) -> impl Responder {
    let (upload_id, page_index) = path.into_inner();
    let target = target.into_inner();
    let (db, storage) = (db.get_ref().clone(), config.storage.clone());
    let extractor = extractor.into_inner();
    respond(
        blocking(move || {
            review::resolve_page(&db, &storage, extractor.as_ref(), upload_id, page_index, &target)
        })
        .await,
    )
}

pub(crate) async fn conflict(
    path: web::Path<(Uuid, u32)>,
    request: web::Json<ResolveConflictRequest>,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    extractor: web::Data<dyn TextExtractor>,
) -> impl Responder {
    let (upload_id, page_index) = path.into_inner();
    let action = request.into_inner().action;
    let (db, storage) = (db.get_ref().clone(), config.storage.clone());
    let extractor = extractor.into_inner();
    respond(
        blocking(move || {
            review::resolve_conflict(&db, &storage, extractor.as_ref(), upload_id, page_index, action)
        })
        .await,
    )
}

pub(crate) async fn sign_off(
    upload_id: web::Path<Uuid>,
    request: web::Json<ReviewRequest>,
    db: web::Data<Database>,
) -> impl Responder {
    let upload_id = upload_id.into_inner();
    let reviewer_id = request.into_inner().reviewer_id;
    let db = db.get_ref().clone();
    respond(blocking(move || review::mark_reviewed(&db, upload_id, reviewer_id)).await)
}

/// Hands a stale `processing` upload back for another ingestion attempt.
pub(crate) async fn release(
    upload_id: web::Path<Uuid>,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
) -> impl Responder {
    let upload_id = upload_id.into_inner();
    let (db, lease) = (db.get_ref().clone(), config.scan.claim_lease());
    respond(blocking(move || review::release(&db, upload_id, lease)).await)
}
