use crate::config::AppConfig;
use crate::db::scan_uploads;
use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::extract::TextExtractor;
use crate::reconcile::{reconcile, StoredPages};
use crate::scan::decode::find_identifier;
use crate::scan::deskew::deskew;
use crate::scan::rasterize::{load_pages, ScanPage};
use crate::scan::{page_image_path, pages_dir};
use common::model::scan::{DecodePath, DecodeStatus, ReportPage, ScanUpload};
use image::ImageFormat;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Claims the upload, decodes every page and attributes the results.
///
/// An unreadable upload ends in `error` and its `UploadFormatError` is
/// returned. Any other failure after the claim puts the upload back to
/// `uploaded` so it can be retried. `progress` receives `(pages done, total)`
/// from the decode workers.
pub fn ingest_upload(
    db: &Database,
    upload_id: Uuid,
    config: &AppConfig,
    extractor: &dyn TextExtractor,
    progress: &(dyn Fn(u32, u32) + Sync),
) -> Result<ScanUpload> {
    let conn = db.open()?;
    let upload = scan_uploads::get(&conn, upload_id)?;
    scan_uploads::claim(&conn, upload_id)?;
    info!("Ingesting upload {} ({})", upload_id, upload.original_filename);

    let pages = match load_pages(Path::new(&upload.file_path), &config.scan) {
        Ok(pages) => pages,
        Err(e) => {
            warn!("Upload {} is unusable: {}", upload_id, e);
            scan_uploads::mark_error(&conn, upload_id, &e.to_string())?;
            return Err(PipelineError::Upload(e));
        }
    };

    let heartbeat = Heartbeat::new(db, upload_id, config.scan.claim_lease() / 3);
    let result = process_pages(&conn, &upload, pages, config, extractor, &|done, total| {
        heartbeat.beat();
        progress(done, total);
    });

    if let Err(e) = &result {
        error!("Ingesting upload {} failed: {}", upload_id, e);
        if let Err(release) = scan_uploads::release_claim(&conn, upload_id) {
            warn!("Upload {} could not be released: {}", upload_id, release);
        }
    }
    result
}

fn process_pages(
    conn: &Connection,
    upload: &ScanUpload,
    pages: Vec<ScanPage>,
    config: &AppConfig,
    extractor: &dyn TextExtractor,
    progress: &(dyn Fn(u32, u32) + Sync),
) -> Result<ScanUpload> {
    let dir = pages_dir(&config.storage.upload_dir, upload.id);
    std::fs::create_dir_all(&dir)?;

    let total = pages.len() as u32;
    let done = AtomicU32::new(0);
    let min_dpi = config.scan.min_dpi;
    let entries: Vec<ReportPage> = pages
        .into_par_iter()
        .map(|page| {
            let entry = decode_page(page, min_dpi, &dir);
            progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
            entry
        })
        .collect();

    let images = StoredPages::new(dir);
    scan_uploads::touch_claim(conn, upload.id)?;
    let outcome = reconcile(conn, upload, entries, &images, extractor)?;
    scan_uploads::mark_processed(conn, upload.id, &outcome.report, &outcome.responses)?;
    let summary = &outcome.report.summary;
    info!(
        "Upload {} processed: {} pages, {} resolved, {} unresolved, {} conflicts",
        upload.id, summary.total_pages, summary.resolved, summary.unresolved, summary.conflicts
    );
    scan_uploads::get(conn, upload.id)
}

/// Refreshes the claim from the decode workers, at most once per `every`.
struct Heartbeat<'a> {
    db: &'a Database,
    upload_id: Uuid,
    every: Duration,
    last: Mutex<Instant>,
}

impl<'a> Heartbeat<'a> {
    fn new(db: &'a Database, upload_id: Uuid, every: Duration) -> Self {
        Self {
            db,
            upload_id,
            every,
            last: Mutex::new(Instant::now()),
        }
    }

    fn beat(&self) {
        // Another worker holding the lock is already refreshing.
        let Ok(mut last) = self.last.try_lock() else {
            return;
        };
        if last.elapsed() < self.every {
            return;
        }
        *last = Instant::now();
        match self.db.open().and_then(|conn| scan_uploads::touch_claim(&conn, self.upload_id)) {
            Ok(true) => debug!("Upload {} claim refreshed", self.upload_id),
            Ok(false) => warn!("Upload {} is no longer claimed by this worker", self.upload_id),
            Err(e) => warn!("Upload {} claim could not be refreshed: {}", self.upload_id, e),
        }
    }
}

/// Decodes one page and stores the image later steps should read: the
/// straightened page when deskewing succeeded, the raster as loaded otherwise.
pub fn decode_page(page: ScanPage, min_dpi: u32, pages_dir: &Path) -> ReportPage {
    let index = page.index;
    let Some(image) = page.image else {
        return ReportPage::unresolved(index, page.error);
    };

    let (entry, stored) = match find_identifier(&image) {
        Ok(payload) => {
            let mut entry = ReportPage::resolved(index, payload.key(), DecodeStatus::Decoded);
            entry.decode_path = Some(DecodePath::Direct);
            (entry, image)
        }
        Err(direct) => match deskew(&image, min_dpi) {
            Ok(straight) => match find_identifier(&straight) {
                Ok(payload) => {
                    let mut entry =
                        ReportPage::resolved(index, payload.key(), DecodeStatus::Decoded);
                    entry.decode_path = Some(DecodePath::Deskewed);
                    (entry, straight)
                }
                Err(after) => (
                    ReportPage::unresolved(index, Some(format!("{}; after deskew: {}", direct, after))),
                    straight,
                ),
            },
            Err(geometry) => (
                ReportPage::unresolved(index, Some(format!("{}; {}", direct, geometry))),
                image,
            ),
        },
    };

    let path = page_image_path(pages_dir, index);
    if let Err(e) = stored.save_with_format(&path, ImageFormat::Png) {
        warn!("Page image {} was not stored: {}", path.display(), e);
    }
    entry
}
