use super::ScanPage;
use image::{GrayImage, Luma};
use log::{debug, warn};
use std::io::{Cursor, Read, Seek};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

/// Every frame of a TIFF as a page, numbered from `first_index`.
///
/// A frame that does not decode stays in the list as a missing page. A broken
/// directory chain ends the list at the last readable frame.
pub(super) fn tiff_pages(bytes: &[u8], first_index: u32) -> Result<Vec<ScanPage>, String> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut pages = Vec::new();
    loop {
        let frame = pages.len() as u32 + 1;
        let index = first_index + frame - 1;
        let page = match frame_to_gray(&mut decoder) {
            Ok(image) => ScanPage::raster(index, image),
            Err(e) => ScanPage::missing(index, format!("TIFF frame {} could not be decoded: {}", frame, e)),
        };
        pages.push(page);
        if !decoder.more_images() {
            break;
        }
        if let Err(e) = decoder.next_image() {
            warn!("TIFF directory after frame {} is unreadable: {}", frame, e);
            break;
        }
    }
    debug!("TIFF holds {} frames", pages.len());
    Ok(pages)
}

fn frame_to_gray<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GrayImage, String> {
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let (channels, bits) = match decoder.colortype().map_err(|e| e.to_string())? {
        ColorType::Gray(bits) => (1, bits),
        ColorType::GrayA(bits) => (2, bits),
        ColorType::RGB(bits) => (3, bits),
        ColorType::RGBA(bits) => (4, bits),
        other => return Err(format!("colour type {:?} is not supported", other)),
    };
    let samples = match decoder.read_image().map_err(|e| e.to_string())? {
        DecodingResult::U8(data) if bits == 8 => data,
        DecodingResult::U8(data) if channels == 1 && matches!(bits, 1 | 2 | 4) => {
            unpack_gray(&data, width, height, bits)
        }
        DecodingResult::U16(data) => data.iter().map(|v| (v >> 8) as u8).collect(),
        _ => return Err(format!("{}-bit samples are not supported", bits)),
    };
    interleaved_to_luma(&samples, width, height, channels)
}

/// Sub-byte grey samples, rows padded to whole bytes, scaled to 0..=255.
pub(super) fn unpack_gray(data: &[u8], width: u32, height: u32, bits: u8) -> Vec<u8> {
    let bits = bits as usize;
    let row_bytes = (width as usize * bits).div_ceil(8);
    let max = (1u16 << bits) - 1;
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let bit = x * bits;
            let byte = data.get(y * row_bytes + bit / 8).copied().unwrap_or(0xff);
            let value = (byte >> (8 - bits - bit % 8)) as u16 & max;
            out.push((value * 255 / max) as u8);
        }
    }
    out
}

/// 8-bit samples with `channels` per pixel. Alpha is dropped.
pub(super) fn interleaved_to_luma(
    data: &[u8],
    width: u32,
    height: u32,
    channels: usize,
) -> Result<GrayImage, String> {
    let pixels = width as usize * height as usize;
    if data.len() < pixels * channels {
        return Err("image data is truncated".to_string());
    }
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let i = (y as usize * width as usize + x as usize) * channels;
        let value = if channels >= 3 {
            let (r, g, b) = (data[i] as u32, data[i + 1] as u32, data[i + 2] as u32);
            ((299 * r + 587 * g + 114 * b) / 1000) as u8
        } else {
            data[i]
        };
        Luma([value])
    }))
}
