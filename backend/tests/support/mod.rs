//! Shared fixtures: a seeded journey in a temporary database and synthetic
//! scans built from the same stamps the booklet prints.
#![allow(dead_code)]

use backend::config::AppConfig;
use backend::db::scan_uploads::{self, NewScanUpload};
use backend::db::Database;
use backend::error::{ExtractionError, Result};
use backend::extract::TextExtractor;
use backend::scan::decode::find_identifier;
use backend::scan::ingest_upload;
use backend::symbol::{stamp_page, SYMBOL_SIZE_MM, SYMBOL_X_MM, SYMBOL_Y_MM};
use common::model::identifier::IdentifierPayload;
use common::model::scan::ScanUpload;
use image::{GrayImage, ImageFormat, Luma};
use rusqlite::params;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use uuid::Uuid;

pub const SCAN_DPI: u32 = 200;

/// DejaVu Sans, named the way genpdf looks families up.
pub fn fixture_fonts() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fonts")
}

pub struct Fixture {
    pub dir: TempDir,
    pub db: Database,
    pub config: AppConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.database_path = dir.path().join("test.sqlite");
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.booklet_dir = dir.path().join("booklets");
        config.storage.fonts_dir = fixture_fonts();
        config.extractor.program = None;
        let db = Database::new(&config.storage.database_path);
        db.initialize().unwrap();
        Self { dir, db, config }
    }

    pub fn ingest(&self, upload_id: Uuid, extractor: &dyn TextExtractor) -> Result<ScanUpload> {
        ingest_upload(&self.db, upload_id, &self.config, extractor, &|_, _| {})
    }

    pub fn upload(&self, file_path: &Path, participation_id: Option<Uuid>) -> ScanUpload {
        let conn = self.db.open().unwrap();
        scan_uploads::insert(
            &conn,
            NewScanUpload {
                id: Uuid::new_v4(),
                participation_id,
                file_path: file_path.to_string_lossy().into_owned(),
                original_filename: file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                content_md5: "0".repeat(32),
            },
        )
        .unwrap()
    }

    /// Writes the pages as `page-NN.png` into a fresh directory.
    pub fn image_set(&self, name: &str, pages: &[GrayImage]) -> PathBuf {
        let dir = self.dir.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for (i, page) in pages.iter().enumerate() {
            page.save_with_format(dir.join(format!("page-{:02}.png", i + 1)), ImageFormat::Png)
                .unwrap();
        }
        dir
    }
}

pub struct Seeded {
    pub journey_id: Uuid,
    pub questions: Vec<Uuid>,
    /// `(user_id, participation_id)` in insertion order.
    pub users: Vec<(Uuid, Uuid)>,
}

impl Seeded {
    pub fn payload(&self, user: usize, page_number: u16) -> IdentifierPayload {
        IdentifierPayload::new(self.journey_id, self.users[user].0, page_number).unwrap()
    }

    pub fn stamp(&self, user: usize, page_number: u16) -> GrayImage {
        stamp_page(&self.payload(user, page_number), SCAN_DPI).unwrap()
    }
}

/// One journey with a question per entry of `pages_per_question`.
pub fn seed_journey(db: &Database, pages_per_question: &[u16], users: usize) -> Seeded {
    let conn = db.open().unwrap();
    let journey_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO journeys (id, title) VALUES (?1, 'Incident response drill')",
        params![journey_id.to_string()],
    )
    .unwrap();

    let mut questions = Vec::new();
    for (i, pages) in pages_per_question.iter().enumerate() {
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO journey_questions (id, journey_id, order_index, prompt, expected_pages)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                journey_id.to_string(),
                i as i64,
                format!("Explain step {}", i + 1),
                *pages as i64
            ],
        )
        .unwrap();
        questions.push(id);
    }

    let mut seeded_users = Vec::new();
    for i in 0..users {
        let (user_id, participation_id) = (Uuid::new_v4(), Uuid::new_v4());
        conn.execute(
            "INSERT INTO users (id, full_name) VALUES (?1, ?2)",
            params![user_id.to_string(), format!("Analyst {}", i + 1)],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO participations (id, journey_id, user_id) VALUES (?1, ?2, ?3)",
            params![
                participation_id.to_string(),
                journey_id.to_string(),
                user_id.to_string()
            ],
        )
        .unwrap();
        seeded_users.push((user_id, participation_id));
    }

    Seeded {
        journey_id,
        questions,
        users: seeded_users,
    }
}

/// Stores a typed (non OCR) answer for the pair.
pub fn typed_response(db: &Database, participation_id: Uuid, question_id: Uuid, text: &str) {
    let conn = db.open().unwrap();
    conn.execute(
        "INSERT INTO question_responses
            (id, participation_id, question_id, answer_text, ocr_source, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, datetime('now'), datetime('now'))",
        params![
            Uuid::new_v4().to_string(),
            participation_id.to_string(),
            question_id.to_string(),
            text
        ],
    )
    .unwrap();
}

/// Rotates around the page centre onto a larger white canvas, like a phone
/// photo of a sheet lying askew on a desk.
pub fn rotate(image: &GrayImage, degrees: f64) -> GrayImage {
    let (w, h) = (image.width() as f64, image.height() as f64);
    let (out_w, out_h) = ((w * 1.4) as u32, (h * 1.3) as u32);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (ox, oy) = (out_w as f64 / 2.0, out_h as f64 / 2.0);
    GrayImage::from_fn(out_w, out_h, |x, y| {
        let (dx, dy) = (x as f64 - ox, y as f64 - oy);
        let u = (cos * dx + sin * dy + w / 2.0).round();
        let v = (-sin * dx + cos * dy + h / 2.0).round();
        if u >= 0.0 && v >= 0.0 && u < w && v < h {
            *image.get_pixel(u as u32, v as u32)
        } else {
            Luma([255])
        }
    })
}

/// A sheet that went through a dirty scanner: streaks, no symbol, no markers.
pub fn streaked_page() -> GrayImage {
    GrayImage::from_fn(1654, 2339, |_, y| Luma([if y % 50 < 6 { 80 } else { 240 }]))
}

/// Overwrites the symbol area of a `SCAN_DPI` page with random pixels. The
/// fiducials stay intact.
pub fn scramble_symbol(page: &mut GrayImage) {
    let px = |mm: f64| (mm * SCAN_DPI as f64 / 25.4).round() as u32;
    let (x0, y0, side) = (px(SYMBOL_X_MM), px(SYMBOL_Y_MM), px(SYMBOL_SIZE_MM));
    let mut state: u32 = 0x9e37_79b9;
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            page.put_pixel(x, y, Luma([(state >> 24) as u8]));
        }
    }
}

/// Stands in for OCR: reports which printed page it was shown, or generic
/// text when the page carries no readable symbol.
#[derive(Default)]
pub struct PageEcho {
    pub calls: AtomicUsize,
}

impl TextExtractor for PageEcho {
    fn extract(&self, page: &GrayImage) -> std::result::Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(match find_identifier(page) {
            Ok(payload) => format!("answer on page {}", payload.page_number),
            Err(_) => "handwritten answer".to_string(),
        })
    }
}

pub struct Failing;

impl TextExtractor for Failing {
    fn extract(&self, _page: &GrayImage) -> std::result::Result<String, ExtractionError> {
        Err(ExtractionError::Command("engine crashed".into()))
    }
}
