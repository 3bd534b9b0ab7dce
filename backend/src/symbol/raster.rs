use crate::codec::encode_compact;
use crate::error::RenderError;
use crate::symbol::{place_fiducials, place_symbol, symbol_matrix, MarkSurface, SymbolMatrix};
use crate::symbol::{PAGE_HEIGHT_MM, PAGE_WIDTH_MM};
use common::model::identifier::IdentifierPayload;
use image::{GrayImage, Luma};

/// A white greyscale page at a fixed resolution.
pub struct RasterPage {
    image: GrayImage,
    px_per_mm: f64,
}

impl RasterPage {
    pub fn new(dpi: u32) -> Self {
        let px_per_mm = dpi as f64 / 25.4;
        let width = (PAGE_WIDTH_MM * px_per_mm).round() as u32;
        let height = (PAGE_HEIGHT_MM * px_per_mm).round() as u32;
        Self {
            image: GrayImage::from_pixel(width, height, Luma([255])),
            px_per_mm,
        }
    }

    fn to_px(&self, mm: f64) -> i64 {
        (mm * self.px_per_mm).round() as i64
    }

    fn pixel_range(&self, start_mm: f64, len_mm: f64, limit: u32) -> (u32, u32) {
        let start = self.to_px(start_mm).clamp(0, limit as i64) as u32;
        let end = self.to_px(start_mm + len_mm).clamp(0, limit as i64) as u32;
        (start, end)
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

impl MarkSurface for RasterPage {
    type Error = RenderError;

    fn fill_square(&mut self, x_mm: f64, y_mm: f64, side_mm: f64) -> Result<(), RenderError> {
        let (x0, x1) = self.pixel_range(x_mm, side_mm, self.image.width());
        let (y0, y1) = self.pixel_range(y_mm, side_mm, self.image.height());
        for y in y0..y1 {
            for x in x0..x1 {
                self.image.put_pixel(x, y, Luma([0]));
            }
        }
        Ok(())
    }

    fn draw_symbol(
        &mut self,
        symbol: &SymbolMatrix,
        x_mm: f64,
        y_mm: f64,
        side_mm: f64,
    ) -> Result<(), RenderError> {
        let (x0, x1) = self.pixel_range(x_mm, side_mm, self.image.width());
        let (y0, y1) = self.pixel_range(y_mm, side_mm, self.image.height());
        let modules = symbol.width() as f64;
        let side_px = (x1 - x0).max(1) as f64;
        for y in y0..y1 {
            for x in x0..x1 {
                let mx = ((x - x0) as f64 / side_px * modules) as usize;
                let my = ((y - y0) as f64 / side_px * modules) as usize;
                let value = if symbol.is_dark(mx, my) { 0 } else { 255 };
                self.image.put_pixel(x, y, Luma([value]));
            }
        }
        Ok(())
    }
}

/// Page stamp (symbol and fiducials, no content) as a raster image. Used for
/// replacement labels and scan calibration.
pub fn stamp_page(payload: &IdentifierPayload, dpi: u32) -> Result<GrayImage, RenderError> {
    let symbol = symbol_matrix(&encode_compact(payload))?;
    let mut page = RasterPage::new(dpi);
    place_fiducials(&mut page)?;
    place_symbol(&mut page, &symbol)?;
    Ok(page.into_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::fiducial_centers_mm;
    use uuid::Uuid;

    #[test]
    fn stamp_has_markers_at_fixed_positions() {
        let payload = IdentifierPayload::new(Uuid::new_v4(), Uuid::new_v4(), 2).unwrap();
        let dpi = 100;
        let image = stamp_page(&payload, dpi).unwrap();
        let px_per_mm = dpi as f64 / 25.4;
        for (cx, cy) in fiducial_centers_mm() {
            let px = image.get_pixel((cx * px_per_mm) as u32, (cy * px_per_mm) as u32);
            assert_eq!(px.0[0], 0);
        }
        // Page centre is blank.
        assert_eq!(image.get_pixel(image.width() / 2, image.height() / 2).0[0], 255);
    }
}
