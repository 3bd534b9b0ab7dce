//! PDF pages to rasters.
//!
//! Pages are rendered with pdfium at the DPI floor when its library can be
//! bound, so vector content and every image encoding come out as the page
//! looks printed. Without pdfium each page falls back to its largest embedded
//! image, which is how scanners store pages.

use super::frames::{interleaved_to_luma, unpack_gray};
use super::ScanPage;
use crate::config::ScanConfig;
use crate::error::UploadFormatError;
use image::{GrayImage, ImageFormat, Luma};
use log::{debug, info};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use pdfium_render::prelude::*;
use std::path::Path;

/// PDF user space is 72 units per inch.
const POINTS_PER_INCH: f32 = 72.0;

pub(super) fn pdf_pages(path: &Path, scan: &ScanConfig) -> Result<Vec<ScanPage>, UploadFormatError> {
    match bind_pdfium(scan.pdfium_library.as_deref()) {
        Ok(pdfium) => rendered_pages(&pdfium, path, scan.min_dpi),
        Err(reason) => {
            info!("pdfium is not available ({}), reading embedded page images", reason);
            embedded_pages(path)
        }
    }
}

fn bind_pdfium(dir: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("{:?}", e))?;
    Ok(Pdfium::new(bindings))
}

fn rendered_pages(pdfium: &Pdfium, path: &Path, dpi: u32) -> Result<Vec<ScanPage>, UploadFormatError> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| UploadFormatError::Unreadable(format!("{}: {:?}", path.display(), e)))?;
    let config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / POINTS_PER_INCH);

    let mut pages = Vec::new();
    for (i, page) in document.pages().iter().enumerate() {
        let index = i as u32 + 1;
        let page = match page.render_with_config(&config) {
            Ok(bitmap) => {
                let bytes = bitmap.as_raw_bytes();
                match bgra_to_gray(&bytes, bitmap.width() as u32, bitmap.height() as u32) {
                    Ok(image) => ScanPage::raster(index, image),
                    Err(reason) => ScanPage::missing(index, reason),
                }
            }
            Err(e) => ScanPage::missing(index, format!("page could not be rendered: {:?}", e)),
        };
        pages.push(page);
    }
    debug!("Rendered {} PDF pages at {} dpi", pages.len(), dpi);
    Ok(pages)
}

/// pdfium bitmaps are BGRA; rows may be padded past `width * 4`.
fn bgra_to_gray(bytes: &[u8], width: u32, height: u32) -> Result<GrayImage, String> {
    if width == 0 || height == 0 {
        return Err("page rendered to an empty bitmap".to_string());
    }
    let stride = bytes.len() / height as usize;
    if stride < width as usize * 4 {
        return Err("rendered bitmap is truncated".to_string());
    }
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * stride + x as usize * 4;
        let (b, g, r) = (bytes[i] as u32, bytes[i + 1] as u32, bytes[i + 2] as u32);
        Luma([((299 * r + 587 * g + 114 * b) / 1000) as u8])
    }))
}

fn embedded_pages(path: &Path) -> Result<Vec<ScanPage>, UploadFormatError> {
    let doc = Document::load(path)
        .map_err(|e| UploadFormatError::Unreadable(format!("{}: {}", path.display(), e)))?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(UploadFormatError::NoPages);
    }
    Ok(pages
        .into_iter()
        .map(|(number, page_id)| match page_image(&doc, page_id) {
            Ok(image) => ScanPage::raster(number, image),
            Err(reason) => ScanPage::missing(number, reason),
        })
        .collect())
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Resources of a page, following `Parent` links for inherited ones.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..32 {
        if let Some(resources) = node
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
        {
            return Some(resources);
        }
        node = node
            .get(b"Parent")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())?;
    }
    None
}

/// The largest image XObject of the page.
fn page_image(doc: &Document, page_id: ObjectId) -> Result<GrayImage, String> {
    let xobjects = page_resources(doc, page_id)
        .and_then(|r| r.get(b"XObject").ok())
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .ok_or_else(|| "page has no embedded images".to_string())?;

    let largest = xobjects
        .iter()
        .filter_map(|(_, o)| resolve(doc, o).and_then(|o| o.as_stream().ok()))
        .filter(|s| {
            s.dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|name| name == b"Image")
                .unwrap_or(false)
        })
        .max_by_key(|s| pixel_count(&s.dict))
        .ok_or_else(|| "page has no embedded images".to_string())?;

    decode_image_stream(doc, largest)
}

fn pixel_count(dict: &Dictionary) -> i64 {
    dict_int(dict, b"Width").saturating_mul(dict_int(dict, b"Height"))
}

fn dict_int(dict: &Dictionary, key: &[u8]) -> i64 {
    dict.get(key).and_then(Object::as_i64).unwrap_or(0)
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Components per pixel of the base space and, for `Indexed`, its palette.
#[derive(Debug, PartialEq)]
enum ColourSpace {
    Direct(usize),
    Indexed { components: usize, palette: Vec<u8> },
}

fn colour_space(doc: &Document, dict: &Dictionary) -> Result<ColourSpace, String> {
    let Some(space) = dict.get(b"ColorSpace").ok().and_then(|o| resolve(doc, o)) else {
        // Only image masks and JPX streams may omit it.
        return Ok(ColourSpace::Direct(1));
    };
    match space {
        Object::Name(name) => named_components(name).map(ColourSpace::Direct),
        Object::Array(items) => {
            let family = items.first().and_then(|o| o.as_name().ok()).unwrap_or_default();
            match family {
                b"ICCBased" => {
                    let components = items
                        .get(1)
                        .and_then(|o| resolve(doc, o))
                        .and_then(|o| o.as_stream().ok())
                        .map(|s| dict_int(&s.dict, b"N"))
                        .unwrap_or(0);
                    match components {
                        1 | 3 | 4 => Ok(ColourSpace::Direct(components as usize)),
                        n => Err(format!("ICC profile with {} components is not supported", n)),
                    }
                }
                b"Indexed" | b"I" => {
                    let base = items
                        .get(1)
                        .and_then(|o| resolve(doc, o))
                        .and_then(|o| o.as_name().ok())
                        .ok_or_else(|| "indexed colour space has no named base".to_string())?;
                    let components = named_components(base)?;
                    let palette = match items.get(3).and_then(|o| resolve(doc, o)) {
                        Some(Object::String(bytes, _)) => bytes.clone(),
                        Some(Object::Stream(stream)) => stream_bytes(stream)?,
                        _ => return Err("indexed colour space has no palette".to_string()),
                    };
                    Ok(ColourSpace::Indexed { components, palette })
                }
                other => Err(format!(
                    "colour space {} is not supported",
                    String::from_utf8_lossy(other)
                )),
            }
        }
        _ => Err("colour space is malformed".to_string()),
    }
}

fn named_components(name: &[u8]) -> Result<usize, String> {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => Ok(1),
        b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(3),
        b"DeviceCMYK" | b"CMYK" => Ok(4),
        other => Err(format!("colour space {} is not supported", String::from_utf8_lossy(other))),
    }
}

/// Stream data with its non-image filters undone.
fn stream_bytes(stream: &Stream) -> Result<Vec<u8>, String> {
    if filters(&stream.dict).is_empty() {
        return Ok(stream.content.clone());
    }
    // lopdf refuses to inflate streams tagged as images.
    let mut plain = stream.clone();
    plain.dict.remove(b"Subtype");
    plain
        .decompressed_content()
        .map_err(|e| format!("embedded image could not be inflated: {}", e))
}

fn decode_params(dict: &Dictionary) -> Option<&Dictionary> {
    match dict.get(b"DecodeParms").ok()? {
        Object::Dictionary(params) => Some(params),
        Object::Array(items) => items.iter().rev().find_map(|o| o.as_dict().ok()),
        _ => None,
    }
}

/// `Decode [1 0]` swaps black and white on single-component images.
fn inverted(dict: &Dictionary) -> bool {
    match dict.get(b"Decode") {
        Ok(Object::Array(range)) => match (range.first(), range.get(1)) {
            (Some(lo), Some(hi)) => lo.as_float().unwrap_or(0.0) > hi.as_float().unwrap_or(1.0),
            _ => false,
        },
        _ => false,
    }
}

fn decode_image_stream(doc: &Document, stream: &Stream) -> Result<GrayImage, String> {
    let dict = &stream.dict;
    let filters = filters(dict);
    let mut image = match filters.last().map(Vec::as_slice) {
        Some(b"DCTDecode") => image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .map(|img| img.to_luma8())
            .map_err(|e| format!("embedded JPEG could not be decoded: {}", e))?,
        Some(b"CCITTFaxDecode") => decode_fax(stream)?,
        Some(b"FlateDecode" | b"LZWDecode" | b"ASCII85Decode") | None => decode_samples(doc, stream)?,
        Some(other) => {
            return Err(format!(
                "embedded image uses {}, which needs pdfium to render",
                String::from_utf8_lossy(other)
            ))
        }
    };
    if inverted(dict) {
        image::imageops::invert(&mut image);
    }
    Ok(image)
}

fn decode_samples(doc: &Document, stream: &Stream) -> Result<GrayImage, String> {
    let dict = &stream.dict;
    let width = dict_int(dict, b"Width");
    let height = dict_int(dict, b"Height");
    let image_mask = dict.get(b"ImageMask").and_then(Object::as_bool).unwrap_or(false);
    let bits = if image_mask { 1 } else { dict_int(dict, b"BitsPerComponent") };
    if width <= 0 || height <= 0 || width > u32::MAX as i64 || height > u32::MAX as i64 {
        return Err(format!("embedded image {}x{} has no usable size", width, height));
    }
    let (width, height) = (width as u32, height as u32);
    let space = if image_mask { ColourSpace::Direct(1) } else { colour_space(doc, dict)? };
    let data = stream_bytes(stream)?;

    match (&space, bits) {
        (ColourSpace::Direct(4), 8) => cmyk_to_gray(&data, width, height),
        (ColourSpace::Direct(components), 8) => interleaved_to_luma(&data, width, height, *components),
        (ColourSpace::Direct(1), 1 | 2 | 4) => {
            gray_from_samples(unpack_gray(&data, width, height, bits as u8), width, height)
        }
        (ColourSpace::Indexed { components, palette }, 1 | 2 | 4 | 8) => {
            let indices = unpack_indices(&data, width, height, bits as u8);
            Ok(GrayImage::from_fn(width, height, |x, y| {
                let index = indices[(y * width + x) as usize] as usize;
                Luma([palette_luma(palette, *components, index)])
            }))
        }
        _ => Err(format!(
            "embedded image {}x{} with {} bits per component is not supported",
            width, height, bits
        )),
    }
}

fn gray_from_samples(samples: Vec<u8>, width: u32, height: u32) -> Result<GrayImage, String> {
    GrayImage::from_raw(width, height, samples).ok_or_else(|| "embedded image is truncated".to_string())
}

/// Raw palette indices, rows padded to whole bytes.
fn unpack_indices(data: &[u8], width: u32, height: u32, bits: u8) -> Vec<u8> {
    if bits == 8 {
        let mut indices = data.to_vec();
        indices.resize(width as usize * height as usize, 0);
        return indices;
    }
    let max = (1u16 << bits) - 1;
    unpack_gray(data, width, height, bits)
        .into_iter()
        .map(|v| (v as u16 * max / 255) as u8)
        .collect()
}

fn palette_luma(palette: &[u8], components: usize, index: usize) -> u8 {
    let start = index * components;
    let Some(entry) = palette.get(start..start + components) else {
        return 255;
    };
    match entry {
        [gray] => *gray,
        [r, g, b] => ((299 * *r as u32 + 587 * *g as u32 + 114 * *b as u32) / 1000) as u8,
        [c, m, y, k] => cmyk_luma(*c, *m, *y, *k),
        _ => 255,
    }
}

fn cmyk_luma(c: u8, m: u8, y: u8, k: u8) -> u8 {
    let ink = |v: u8| 255 - (v as u32 + k as u32).min(255);
    let (r, g, b) = (ink(c), ink(m), ink(y));
    ((299 * r + 587 * g + 114 * b) / 1000) as u8
}

fn cmyk_to_gray(data: &[u8], width: u32, height: u32) -> Result<GrayImage, String> {
    if data.len() < width as usize * height as usize * 4 {
        return Err("embedded image is truncated".to_string());
    }
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let i = (y as usize * width as usize + x as usize) * 4;
        Luma([cmyk_luma(data[i], data[i + 1], data[i + 2], data[i + 3])])
    }))
}

/// CCITT Group 3 (1-D) and Group 4 streams.
fn decode_fax(stream: &Stream) -> Result<GrayImage, String> {
    let params = decode_params(&stream.dict);
    let param = |key: &[u8]| params.and_then(|p| p.get(key).ok());
    let k = param(b"K").and_then(|o| o.as_i64().ok()).unwrap_or(0);
    let columns = param(b"Columns").and_then(|o| o.as_i64().ok()).unwrap_or(1728);
    let rows = param(b"Rows")
        .and_then(|o| o.as_i64().ok())
        .unwrap_or_else(|| dict_int(&stream.dict, b"Height"));
    if columns <= 0 || columns > u16::MAX as i64 || rows < 0 || rows > u16::MAX as i64 {
        return Err(format!("fax image {}x{} is out of range", columns, rows));
    }
    let (width, height) = (columns as u16, rows as u16);
    let black_is_1 = param(b"BlackIs1").and_then(|o| o.as_bool().ok()).unwrap_or(false);

    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    let mut line = |transitions: &[u16]| {
        for colour in fax::decoder::pels(transitions, width) {
            let black = colour == fax::Color::Black;
            pixels.push(if black { 0 } else { 255 });
        }
    };
    let input = stream.content.iter().copied();
    let decoded = if k < 0 {
        fax::decoder::decode_g4(input, width, (height > 0).then_some(height), &mut line)
    } else if k == 0 {
        fax::decoder::decode_g3(input, &mut line)
    } else {
        return Err("mixed 1-D/2-D fax images are not supported".to_string());
    };
    if decoded.is_none() && pixels.is_empty() {
        return Err("fax image could not be decoded".to_string());
    }
    let lines = (pixels.len() / width as usize) as u32;
    pixels.truncate(lines as usize * width as usize);
    let mut image = gray_from_samples(pixels, width as u32, lines)?;
    // With BlackIs1 coded black comes out as sample 1, which DeviceGray shows as white.
    if black_is_1 {
        image::imageops::invert(&mut image);
    }
    Ok(image)
}
