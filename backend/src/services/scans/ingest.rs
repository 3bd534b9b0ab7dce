//! `POST /api/scans/{upload_id}/ingest`
//!
//! Answers with a `job_id` right away and ingests in the background: a tokio
//! task drives `ingest_upload` on the blocking pool, page progress comes back
//! over a per-job channel and is forwarded to the job controller as a
//! percentage. The job ends `Completed` with a one-line summary, or `Failed`
//! with the error.

use crate::config::AppConfig;
use crate::db::{audit, scan_uploads, Database};
use crate::error::{PipelineError, Result};
use crate::extract::TextExtractor;
use crate::job_controller::state::{JobUpdate, JobsState};
use crate::scan::ingest_upload;
use crate::services::blocking;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use common::jobs::JobStatus;
use common::model::scan::ScanStatus;
use log::warn;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Pages handled so far, sent from the blocking worker.
#[derive(Debug)]
struct PageProgress {
    done: u32,
    total: u32,
}

pub(crate) async fn process(
    upload_id: web::Path<Uuid>,
    state: web::Data<JobsState>,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    extractor: web::Data<dyn TextExtractor>,
) -> impl Responder {
    match schedule_ingest_job(upload_id.into_inner(), state, db, config, extractor).await {
        Ok(job_id) => HttpResponse::Ok().json(json!({ "job_id": job_id })),
        Err(e) => e.error_response(),
    }
}

/// Rejects uploads that are not waiting for ingestion before a job exists, so
/// the client gets the error instead of a job that fails at once.
async fn schedule_ingest_job(
    upload_id: Uuid,
    state: web::Data<JobsState>,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
    extractor: web::Data<dyn TextExtractor>,
) -> Result<String> {
    let db = db.get_ref().clone();
    let check_db = db.clone();
    let upload = blocking(move || scan_uploads::get(&check_db.open()?, upload_id)).await?;
    match upload.status {
        ScanStatus::Uploaded => {}
        ScanStatus::Processing => return Err(PipelineError::AlreadyClaimed(upload_id.to_string())),
        other => {
            return Err(PipelineError::InvalidState(format!(
                "upload {} is {}, only uploaded scans can be ingested",
                upload_id,
                other.as_str()
            )))
        }
    }

    let job_id = Uuid::new_v4().to_string();
    state.register(&job_id).await;

    let tx = state.tx.clone();
    let config = config.get_ref().clone();
    let extractor = extractor.into_inner();
    let job_id_clone = job_id.clone();

    tokio::spawn(async move {
        let (ingest_tx, mut ingest_rx) = mpsc::channel::<PageProgress>(100);

        let progress_tx = tx.clone();
        let job_id_for_progress = job_id_clone.clone();
        tokio::spawn(async move {
            while let Some(PageProgress { done, total }) = ingest_rx.recv().await {
                let percent = if total > 0 { done * 100 / total } else { 0 };
                let _ = progress_tx
                    .send(JobUpdate {
                        job_id: job_id_for_progress.clone(),
                        status: JobStatus::InProgress(percent),
                    })
                    .await;
            }
        });

        let worker_db = db.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let progress = |done: u32, total: u32| {
                let _ = ingest_tx.blocking_send(PageProgress { done, total });
            };
            ingest_upload(&worker_db, upload_id, &config, extractor.as_ref(), &progress)
        });

        let status = match handle.await {
            Ok(Ok(upload)) => {
                let summary = upload
                    .import_report
                    .as_ref()
                    .map(|r| r.summary.clone())
                    .unwrap_or_default();
                audit::record(
                    &db,
                    "scan.ingested",
                    upload_id,
                    json!({
                        "pages": summary.total_pages,
                        "resolved": summary.resolved,
                        "conflicts": summary.conflicts,
                    }),
                );
                JobStatus::Completed(format!(
                    "{} of {} pages resolved, {} attributed, {} conflicts",
                    summary.resolved, summary.total_pages, summary.attributed, summary.conflicts
                ))
            }
            Ok(Err(e)) => {
                warn!("Ingestion of upload {} failed: {}", upload_id, e);
                JobStatus::Failed(e.to_string())
            }
            Err(e) => JobStatus::Failed(format!("Task join error: {}", e)),
        };

        let _ = tx
            .send(JobUpdate {
                job_id: job_id_clone,
                status,
            })
            .await;
    });

    Ok(job_id)
}
