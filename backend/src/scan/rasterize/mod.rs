//! Upload files to greyscale page images.
//!
//! The format is sniffed from content, never from the file name. Every frame
//! of a TIFF is a page; PDF pages are rendered (see [`pdf`]).

mod frames;
mod pdf;

use crate::config::ScanConfig;
use crate::error::UploadFormatError;
use crate::symbol::PAGE_WIDTH_MM;
use image::imageops::FilterType;
use image::{GrayImage, ImageFormat, Luma};
use log::{debug, warn};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Larger factors only magnify blur.
const MAX_UPSCALE: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Pdf,
    Image(ImageFormat),
    ImageSet,
}

/// One physical page of an upload. `image` is `None` when the page exists but
/// holds nothing decodable; `error` then says why.
pub struct ScanPage {
    /// 1-based position in the upload.
    pub index: u32,
    pub image: Option<GrayImage>,
    pub error: Option<String>,
}

impl ScanPage {
    fn raster(index: u32, image: GrayImage) -> Self {
        Self {
            index,
            image: Some(image),
            error: None,
        }
    }

    fn missing(index: u32, error: String) -> Self {
        Self {
            index,
            image: None,
            error: Some(error),
        }
    }
}

pub fn detect_format(path: &Path) -> Result<UploadFormat, UploadFormatError> {
    if path.is_dir() {
        return Ok(UploadFormat::ImageSet);
    }
    let mut head = [0u8; 16];
    let read = File::open(path)
        .and_then(|mut f| f.read(&mut head))
        .map_err(|e| UploadFormatError::Unreadable(format!("{}: {}", path.display(), e)))?;
    sniff(&head[..read])
}

fn sniff(head: &[u8]) -> Result<UploadFormat, UploadFormatError> {
    if head.starts_with(b"%PDF-") {
        return Ok(UploadFormat::Pdf);
    }
    match image::guess_format(head) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Tiff)) => {
            Ok(UploadFormat::Image(format))
        }
        _ => Err(UploadFormatError::Unsupported),
    }
}

/// Every page of the upload at `path`, in physical order, upscaled to at least
/// `scan.min_dpi`.
pub fn load_pages(path: &Path, scan: &ScanConfig) -> Result<Vec<ScanPage>, UploadFormatError> {
    let format = detect_format(path)?;
    debug!("Upload {} detected as {:?}", path.display(), format);
    let min_dpi = scan.min_dpi;
    let pages = match format {
        UploadFormat::Pdf => pdf::pdf_pages(path, scan)?,
        UploadFormat::Image(ImageFormat::Tiff) => frames::tiff_pages(&read_upload(path)?, 1)
            .map_err(|e| UploadFormatError::Unreadable(format!("{}: {}", path.display(), e)))?,
        UploadFormat::Image(format) => vec![ScanPage::raster(1, open_image(path, format)?)],
        UploadFormat::ImageSet => image_set_pages(path)?,
    };
    if pages.is_empty() {
        return Err(UploadFormatError::NoPages);
    }
    Ok(pages
        .into_iter()
        .map(|mut page| {
            page.image = page.image.map(|img| apply_dpi_floor(img, min_dpi));
            page
        })
        .collect())
}

fn read_upload(path: &Path) -> Result<Vec<u8>, UploadFormatError> {
    std::fs::read(path).map_err(|e| UploadFormatError::Unreadable(format!("{}: {}", path.display(), e)))
}

fn open_image(path: &Path, format: ImageFormat) -> Result<GrayImage, UploadFormatError> {
    let bytes = read_upload(path)?;
    image::load_from_memory_with_format(&bytes, format)
        .map(|img| img.to_luma8())
        .map_err(|e| UploadFormatError::Unreadable(format!("{}: {}", path.display(), e)))
}

/// Files of the directory sorted by name. Hidden files are ignored; a file
/// that is not a supported image still counts as a page so page positions
/// match what the operator uploaded. A multi-frame TIFF counts once per frame.
fn image_set_pages(dir: &Path) -> Result<Vec<ScanPage>, UploadFormatError> {
    let read_dir = std::fs::read_dir(dir)
        .map_err(|e| UploadFormatError::Unreadable(format!("{}: {}", dir.display(), e)))?;
    let mut files: Vec<_> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut pages: Vec<ScanPage> = Vec::with_capacity(files.len());
    for file in &files {
        let index = pages.len() as u32 + 1;
        match detect_format(file) {
            Ok(UploadFormat::Image(ImageFormat::Tiff)) => {
                match read_upload(file).and_then(|bytes| {
                    frames::tiff_pages(&bytes, index).map_err(UploadFormatError::Unreadable)
                }) {
                    Ok(frames) => pages.extend(frames),
                    Err(e) => pages.push(ScanPage::missing(index, e.to_string())),
                }
            }
            Ok(UploadFormat::Image(format)) => pages.push(match open_image(file, format) {
                Ok(image) => ScanPage::raster(index, image),
                Err(e) => ScanPage::missing(index, e.to_string()),
            }),
            Ok(_) | Err(_) => {
                warn!("Skipping unsupported file {} in image set", file.display());
                pages.push(ScanPage::missing(
                    index,
                    format!("{} is not a supported image", display_name(file)),
                ));
            }
        }
    }
    Ok(pages)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolution of a page image relative to an A4 sheet across its short side.
pub fn estimated_dpi(image: &GrayImage) -> f64 {
    let short_side = image.width().min(image.height()) as f64;
    short_side / (PAGE_WIDTH_MM / 25.4)
}

pub fn apply_dpi_floor(image: GrayImage, min_dpi: u32) -> GrayImage {
    let dpi = estimated_dpi(&image);
    if dpi <= 0.0 || dpi >= min_dpi as f64 {
        return image;
    }
    let factor = (min_dpi as f64 / dpi).min(MAX_UPSCALE);
    let width = (image.width() as f64 * factor).round() as u32;
    let height = (image.height() as f64 * factor).round() as u32;
    debug!(
        "Upscaling page from ~{:.0} dpi by {:.2} to {}x{}",
        dpi, factor, width, height
    );
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sniffing_ignores_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("scan.pdf");
        std::fs::File::create(&fake)
            .unwrap()
            .write_all(b"just some notes, not a document")
            .unwrap();
        assert!(matches!(detect_format(&fake), Err(UploadFormatError::Unsupported)));

        let png = dir.path().join("page.bin");
        GrayImage::from_pixel(8, 8, Luma([255])).save_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!(detect_format(&png).unwrap(), UploadFormat::Image(ImageFormat::Png));
        assert_eq!(sniff(b"%PDF-1.7\n").unwrap(), UploadFormat::Pdf);
    }

    #[test]
    fn low_resolution_pages_are_upscaled() {
        // ~100 dpi across an A4 width.
        let image = GrayImage::from_pixel(827, 1169, Luma([255]));
        let upscaled = apply_dpi_floor(image, 200);
        assert!(estimated_dpi(&upscaled) >= 199.0);

        let sharp = GrayImage::from_pixel(2480, 3508, Luma([255]));
        assert_eq!(apply_dpi_floor(sharp, 200).width(), 2480);
    }

    #[test]
    fn image_set_keeps_positions_of_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let page = GrayImage::from_pixel(1700, 2400, Luma([255]));
        page.save_with_format(dir.path().join("01.png"), ImageFormat::Png).unwrap();
        std::fs::write(dir.path().join("02.png"), b"broken").unwrap();
        page.save_with_format(dir.path().join("03.png"), ImageFormat::Png).unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"x").unwrap();

        let pages = load_pages(dir.path(), &ScanConfig::default()).unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].image.is_some());
        assert!(pages[1].image.is_none() && pages[1].error.is_some());
        assert_eq!(pages[2].index, 3);
    }

    #[test]
    fn empty_image_set_has_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_pages(dir.path(), &ScanConfig::default()), Err(UploadFormatError::NoPages)));
    }
}
