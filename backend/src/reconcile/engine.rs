use crate::booklet::BookletLayout;
use crate::db::journeys::{load_journey, participation_for};
use crate::db::responses::{self, CreateOutcome};
use crate::error::{ExtractionError, PipelineError, Result};
use crate::extract::TextExtractor;
use crate::scan::{page_image_path, pages_dir};
use common::model::identifier::PageKey;
use common::model::scan::{DecodeStatus, ExtractedResponse, ImportReport, ReportPage, ScanUpload};
use image::GrayImage;
use log::{debug, info};
use rayon::prelude::*;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ANSWER_SEPARATOR: &str = "\n\n";

/// Where page images are read from for text extraction.
pub trait PageImageSource: Sync {
    fn page_image(&self, page_index: u32) -> Result<GrayImage, ExtractionError>;
}

/// Page images stored by the ingestor under the upload directory.
pub struct StoredPages {
    dir: PathBuf,
}

impl StoredPages {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_upload(upload_dir: &Path, upload_id: Uuid) -> Self {
        Self::new(pages_dir(upload_dir, upload_id))
    }
}

impl PageImageSource for StoredPages {
    fn page_image(&self, page_index: u32) -> Result<GrayImage, ExtractionError> {
        let path = page_image_path(&self.dir, page_index);
        image::open(&path)
            .map(|img| img.to_luma8())
            .map_err(|e| ExtractionError::MissingImage(format!("{}: {}", path.display(), e)))
    }
}

pub struct Reconciliation {
    pub report: ImportReport,
    pub responses: Vec<ExtractedResponse>,
}

/// Builds the import report of an upload from its decoded pages.
///
/// A page identity seen twice is a conflict on the later page. Every other
/// resolved page is attributed per `(journey, user)` group; see
/// [`Attributor::identity`].
pub fn reconcile(
    conn: &Connection,
    upload: &ScanUpload,
    pages: Vec<ReportPage>,
    images: &dyn PageImageSource,
    extractor: &dyn TextExtractor,
) -> Result<Reconciliation> {
    let mut report = ImportReport::from_pages(pages);
    mark_duplicates(&mut report);

    let identities: BTreeSet<(Uuid, Uuid)> = report
        .pages
        .iter()
        .filter(|p| p.is_resolved())
        .filter_map(|p| p.key())
        .map(|k| (k.journey_id, k.user_id))
        .collect();

    let attributor = Attributor {
        conn,
        upload,
        images,
        extractor,
    };
    let mut responses = Vec::new();
    for (journey_id, user_id) in identities {
        attributor.identity(&mut report, journey_id, user_id, None, &mut responses)?;
    }
    report.refresh_summary();
    Ok(Reconciliation { report, responses })
}

fn mark_duplicates(report: &mut ImportReport) {
    let mut first_seen: HashMap<PageKey, u32> = HashMap::new();
    for page in report.pages.iter_mut() {
        let Some(key) = page.key().filter(|_| page.is_resolved()) else {
            continue;
        };
        match first_seen.get(&key) {
            Some(&original) => {
                debug!("Page {} duplicates page {}", page.page_index, original);
                page.decode_status = DecodeStatus::Conflict;
                page.note = Some(format!("duplicate of page {} in this upload", original));
            }
            None => {
                first_seen.insert(key, page.page_index);
            }
        }
    }
}

pub(crate) struct Attributor<'a> {
    pub conn: &'a Connection,
    pub upload: &'a ScanUpload,
    pub images: &'a dyn PageImageSource,
    pub extractor: &'a dyn TextExtractor,
}

impl Attributor<'_> {
    /// Attributes the resolved pages of one `(journey, user)` pair.
    ///
    /// The pair must map to a participation, and to the upload's own
    /// participation when the upload has one. Pages are grouped by question
    /// with the booklet pagination rule. With `only_page`, just the question
    /// group holding that page is processed.
    pub fn identity(
        &self,
        report: &mut ImportReport,
        journey_id: Uuid,
        user_id: Uuid,
        only_page: Option<u32>,
        responses: &mut Vec<ExtractedResponse>,
    ) -> Result<()> {
        let members: Vec<usize> = report
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.is_resolved() && p.journey_id == Some(journey_id) && p.user_id == Some(user_id)
            })
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return Ok(());
        }

        let journey = match load_journey(self.conn, journey_id) {
            Ok(journey) => journey,
            Err(PipelineError::NotFound(_)) => {
                flag(report, &members, format!("journey {} does not exist", journey_id));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let Some(participation_id) = participation_for(self.conn, journey_id, user_id)? else {
            flag(report, &members, "user is not a participant of this journey".to_string());
            return Ok(());
        };
        if let Some(expected) = self.upload.participation_id {
            if expected != participation_id {
                flag(
                    report,
                    &members,
                    "page belongs to a different participant than this upload".to_string(),
                );
                return Ok(());
            }
        }

        let layout = BookletLayout::new(&journey.questions);
        let mut by_question: BTreeMap<(usize, Uuid), Vec<usize>> = BTreeMap::new();
        for &i in &members {
            let page = &mut report.pages[i];
            page.participation_id = Some(participation_id);
            let number = page.page_number.unwrap_or(0);
            match layout.question_for_page(number) {
                Some(slot) => {
                    page.question_id = Some(slot.question_id);
                    by_question
                        .entry((slot.question_number, slot.question_id))
                        .or_default()
                        .push(i);
                }
                None => {
                    page.question_id = None;
                    page.attributed = false;
                    page.error = Some(format!(
                        "page {} is outside the {}-page booklet",
                        number,
                        layout.total_pages()
                    ));
                }
            }
        }

        let target = only_page
            .and_then(|idx| report.page(idx))
            .and_then(|p| p.question_id);
        for ((_, question_id), mut group) in by_question {
            if only_page.is_some() && target != Some(question_id) {
                continue;
            }
            group.sort_by_key(|&i| (report.pages[i].page_number, report.pages[i].page_index));
            self.question(report, participation_id, question_id, &group, responses)?;
        }
        Ok(())
    }

    fn question(
        &self,
        report: &mut ImportReport,
        participation_id: Uuid,
        question_id: Uuid,
        group: &[usize],
        responses: &mut Vec<ExtractedResponse>,
    ) -> Result<()> {
        for &i in group {
            let page = &mut report.pages[i];
            page.attributed = false;
            page.error = None;
            page.note = None;
        }

        if let Some(existing) = responses::find(self.conn, participation_id, question_id)? {
            if existing.scan_upload_id != Some(self.upload.id) {
                mark_conflict(report, group);
                return Ok(());
            }
        }

        let page_indexes: Vec<u32> = group.iter().map(|&i| report.pages[i].page_index).collect();
        let Some(answer_text) = self.extract_text(report, group, &page_indexes) else {
            return Ok(());
        };

        match responses::create_ocr_response(
            self.conn,
            participation_id,
            question_id,
            &answer_text,
            self.upload.id,
        )? {
            CreateOutcome::Created(_) => {}
            // Earlier run of this same upload: bring it up to date.
            CreateOutcome::Exists(own) if own.scan_upload_id == Some(self.upload.id) => {
                if own.answer_text != answer_text {
                    responses::replace_with_ocr(self.conn, own.id, &answer_text, self.upload.id)?;
                }
            }
            CreateOutcome::Exists(_) => {
                mark_conflict(report, group);
                return Ok(());
            }
        }

        for &i in group {
            report.pages[i].attributed = true;
        }
        info!(
            "Upload {}: question {} of participation {} read from pages {:?}",
            self.upload.id, question_id, participation_id, page_indexes
        );
        upsert_response(
            responses,
            ExtractedResponse {
                participation_id,
                question_id,
                answer_text,
                pages: page_indexes,
            },
        );
        Ok(())
    }

    /// Text of the pages in order, or `None` after recording a failure on
    /// every page that could not be read.
    pub fn extract_text(
        &self,
        report: &mut ImportReport,
        group: &[usize],
        page_indexes: &[u32],
    ) -> Option<String> {
        let (images, extractor) = (self.images, self.extractor);
        let results: Vec<Result<String, ExtractionError>> = page_indexes
            .par_iter()
            .map(|&idx| images.page_image(idx).and_then(|img| extractor.extract(&img)))
            .collect();

        let mut texts = Vec::with_capacity(results.len());
        let mut failed = false;
        for (&i, result) in group.iter().zip(results) {
            match result {
                Ok(text) => texts.push(text),
                Err(e) => {
                    failed = true;
                    report.pages[i].error = Some(format!("text extraction failed: {}", e));
                }
            }
        }
        if failed {
            None
        } else {
            Some(texts.join(ANSWER_SEPARATOR))
        }
    }
}

fn flag(report: &mut ImportReport, pages: &[usize], error: String) {
    for &i in pages {
        let page = &mut report.pages[i];
        page.attributed = false;
        page.error = Some(error.clone());
    }
}

fn mark_conflict(report: &mut ImportReport, group: &[usize]) {
    for &i in group {
        let page = &mut report.pages[i];
        page.decode_status = DecodeStatus::Conflict;
        page.attributed = false;
        page.resolution = None;
        page.note = Some("a response to this question already exists".to_string());
    }
}

pub(crate) fn upsert_response(responses: &mut Vec<ExtractedResponse>, response: ExtractedResponse) {
    match responses.iter_mut().find(|r| {
        r.participation_id == response.participation_id && r.question_id == response.question_id
    }) {
        Some(slot) => *slot = response,
        None => responses.push(response),
    }
}
