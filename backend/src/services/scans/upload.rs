//! `POST /api/scans/upload`
//!
//! Multipart body: an optional `json` part with `UploadMetadata`, then one or
//! more `file` parts. Files are written to `<upload_dir>/<upload_id>/files/`
//! with an index prefix so an image set keeps the order it was sent in. A
//! single file becomes the upload's `file_path`; several files make the
//! directory an image set. The MD5 covers every uploaded byte in order.

use crate::config::AppConfig;
use crate::db::journeys::participation_exists;
use crate::db::scan_uploads::{self, NewScanUpload};
use crate::db::{audit, Database};
use crate::error::{PipelineError, Result};
use crate::scan::upload_root;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use common::model::scan::ScanUpload;
use common::requests::UploadMetadata;
use futures_util::StreamExt;
use log::{info, warn};
use md5::Context;
use serde_json::{from_slice, json};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub(crate) async fn process(
    payload: Multipart,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
) -> impl Responder {
    let upload_id = Uuid::new_v4();
    let root = upload_root(&config.storage.upload_dir, upload_id);
    match upload_scan(payload, db.get_ref(), &root, upload_id).await {
        Ok(upload) => HttpResponse::Ok().json(upload),
        Err(e) => {
            if root.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&root) {
                    warn!("Could not remove partial upload {}: {}", root.display(), cleanup);
                }
            }
            e.error_response()
        }
    }
}

async fn upload_scan(
    mut payload: Multipart,
    db: &Database,
    root: &Path,
    upload_id: Uuid,
) -> Result<ScanUpload> {
    let files_dir = root.join("files");
    let mut metadata = UploadMetadata::default();
    let mut md5_hasher = Context::new();
    let mut stored: Vec<(PathBuf, String)> = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| PipelineError::BadRequest(e.to_string()))?;
        let part_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));

        match part_name.as_deref() {
            Some("file") => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(sanitize_filename))
                    .unwrap_or_else(|| "upload".to_string());

                fs::create_dir_all(&files_dir)?;
                let path = files_dir.join(format!("{:04}-{}", stored.len() + 1, filename));
                let mut writer = BufWriter::new(File::create(&path)?);
                let mut written = 0usize;
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| PipelineError::BadRequest(e.to_string()))?;
                    md5_hasher.consume(&chunk);
                    writer.write_all(&chunk)?;
                    written += chunk.len();
                }
                writer.flush()?;
                if written == 0 {
                    return Err(PipelineError::BadRequest(format!("file '{}' is empty", filename)));
                }
                stored.push((path, filename));
            }

            Some("json") => {
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| PipelineError::BadRequest(e.to_string()))?;
                    bytes.extend_from_slice(&chunk);
                }
                metadata = from_slice(&bytes)
                    .map_err(|e| PipelineError::BadRequest(format!("invalid upload metadata: {}", e)))?;
            }

            _ => {}
        }
    }

    if let Some(participation_id) = metadata.participation_id {
        if !participation_exists(db, participation_id)? {
            return Err(PipelineError::NotFound(format!(
                "participation {} does not exist",
                participation_id
            )));
        }
    }

    let (file_path, original_filename) = match stored.as_slice() {
        [] => return Err(PipelineError::BadRequest("missing file".into())),
        [(path, name)] => (path.clone(), name.clone()),
        [(_, first), ..] => (files_dir.clone(), format!("{} (+{} more)", first, stored.len() - 1)),
    };

    let conn = db.open()?;
    let upload = scan_uploads::insert(
        &conn,
        NewScanUpload {
            id: upload_id,
            participation_id: metadata.participation_id,
            file_path: file_path.to_string_lossy().into_owned(),
            original_filename,
            content_md5: format!("{:x}", md5_hasher.finalize()),
        },
    )?;

    info!(
        "Stored upload {} ({} file(s), md5 {})",
        upload.id,
        stored.len(),
        upload.content_md5
    );
    audit::record(
        db,
        "scan.uploaded",
        upload.id,
        json!({ "files": stored.len(), "participation_id": upload.participation_id }),
    );
    Ok(upload)
}

/// Keeps only the final path component and characters safe in a file name.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize_filename;

    #[test]
    fn filenames_lose_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\scans\\class 3b.pdf"), "class_3b.pdf");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("..."), "upload");
    }
}
