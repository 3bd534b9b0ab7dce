//! # Scan ingestion
//!
//! Turns an uploaded PDF, image or image set into per-page identities:
//! rasterise, upscale to the DPI floor, read the symbol, and when that fails
//! straighten the page from its fiducials and read it again. The processed
//! page images are kept next to the upload for text extraction and manual
//! review.

pub mod decode;
pub mod deskew;
mod ingest;
pub mod rasterize;

pub use ingest::{decode_page, ingest_upload};

use std::path::{Path, PathBuf};
use uuid::Uuid;

pub fn upload_root(upload_dir: &Path, upload_id: Uuid) -> PathBuf {
    upload_dir.join(upload_id.to_string())
}

pub fn pages_dir(upload_dir: &Path, upload_id: Uuid) -> PathBuf {
    upload_root(upload_dir, upload_id).join("pages")
}

pub fn page_image_path(pages_dir: &Path, page_index: u32) -> PathBuf {
    pages_dir.join(format!("page-{:04}.png", page_index))
}
