use crate::codec::decode_compact;
use crate::error::DecodeFailure;
use crate::scan::deskew::otsu_threshold;
use common::model::identifier::IdentifierPayload;
use image::imageops::FilterType;
use image::{GrayImage, Luma};
use log::trace;
use rqrr::PreparedImage;

/// Pages with a shorter side than this (about 170 dpi on A4) are doubled
/// before the second attempt.
const UPSCALE_BELOW_PX: u32 = 1400;

/// Finds a QR symbol on the page and decodes its identifier.
///
/// Symbols that read but do not carry a valid identifier are skipped; the
/// failure of the last one is returned if nothing valid is found. When the
/// page yields nothing it is searched once more as a sharpened raster.
pub fn find_identifier(image: &GrayImage) -> Result<IdentifierPayload, DecodeFailure> {
    let first = match scan_symbols(image) {
        Ok(payload) => return Ok(payload),
        Err(failure) => failure,
    };
    trace!("Retrying symbol search on a sharpened page ({})", first);
    match scan_symbols(&sharpened(image)) {
        Ok(payload) => Ok(payload),
        Err(DecodeFailure::NoSymbol) => Err(first),
        Err(failure) => Err(failure),
    }
}

/// Binarised copy, doubled when modules are only a few pixels wide.
/// Resampling blurs module edges into grey ramps the grid finder misses.
fn sharpened(image: &GrayImage) -> GrayImage {
    let upscaled;
    let source = if image.width().min(image.height()) < UPSCALE_BELOW_PX {
        upscaled = image::imageops::resize(
            image,
            image.width() * 2,
            image.height() * 2,
            FilterType::Triangle,
        );
        &upscaled
    } else {
        image
    };
    let threshold = otsu_threshold(source);
    GrayImage::from_fn(source.width(), source.height(), |x, y| {
        Luma([if source.get_pixel(x, y).0[0] <= threshold { 0 } else { 255 }])
    })
}

fn scan_symbols(image: &GrayImage) -> Result<IdentifierPayload, DecodeFailure> {
    let mut prepared = PreparedImage::prepare_from_greyscale(
        image.width() as usize,
        image.height() as usize,
        |x, y| image.get_pixel(x as u32, y as u32).0[0],
    );
    let mut last_failure = DecodeFailure::NoSymbol;
    for grid in prepared.detect_grids() {
        let text = match grid.decode() {
            Ok((_, text)) => text,
            Err(e) => {
                trace!("Symbol grid did not decode: {:?}", e);
                continue;
            }
        };
        match decode_compact(&text) {
            Ok(payload) => return Ok(payload),
            Err(failure) => last_failure = failure,
        }
    }
    Err(last_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::stamp_page;
    use qrcode::QrCode;
    use uuid::Uuid;

    #[test]
    fn stamped_page_decodes_to_its_payload() {
        let payload = IdentifierPayload::new(Uuid::new_v4(), Uuid::new_v4(), 7).unwrap();
        let page = stamp_page(&payload, 200).unwrap();
        assert_eq!(find_identifier(&page).unwrap(), payload);
    }

    #[test]
    fn blurred_small_symbol_reads_after_sharpening() {
        let payload = IdentifierPayload::new(Uuid::new_v4(), Uuid::new_v4(), 3).unwrap();
        let page = stamp_page(&payload, 150).unwrap();
        // Two bilinear half-pixel shifts, like a scan resampled twice.
        let shift = |img: &GrayImage| {
            GrayImage::from_fn(img.width(), img.height(), |x, y| {
                let x1 = (x + 1).min(img.width() - 1);
                let y1 = (y + 1).min(img.height() - 1);
                let sum: u32 = [(x, y), (x1, y), (x, y1), (x1, y1)]
                    .iter()
                    .map(|&(px, py)| img.get_pixel(px, py).0[0] as u32)
                    .sum();
                Luma([(sum / 4) as u8])
            })
        };
        let blurred = shift(&shift(&page));
        assert_eq!(find_identifier(&blurred).unwrap(), payload);
    }

    #[test]
    fn blank_page_has_no_symbol() {
        let page = GrayImage::from_pixel(400, 600, Luma([255]));
        assert_eq!(find_identifier(&page), Err(DecodeFailure::NoSymbol));
    }

    #[test]
    fn foreign_symbol_is_not_an_identifier() {
        let code = QrCode::new(b"https://example.org/not-a-booklet").unwrap();
        let width = code.width();
        let colors = code.to_colors();
        let module = 6u32;
        let side = (width as u32 + 8) * module;
        let image = GrayImage::from_fn(side, side, |x, y| {
            let (mx, my) = ((x / module) as i64 - 4, (y / module) as i64 - 4);
            let dark = mx >= 0
                && my >= 0
                && (mx as usize) < width
                && (my as usize) < width
                && colors[my as usize * width + mx as usize] == qrcode::Color::Dark;
            Luma([if dark { 0 } else { 255 }])
        });
        assert_eq!(find_identifier(&image), Err(DecodeFailure::NotBase64));
    }
}
