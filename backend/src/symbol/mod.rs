//! Scannable symbols and fiducial markers.
//!
//! All geometry is fixed for the deployment and shared with the scan deskew
//! step. Coordinates are millimetres from the top-left corner of an A4 page.

mod fiducials;
mod raster;
mod render;

pub use fiducials::{place_fiducials, place_symbol, MarkSurface};
pub use raster::{stamp_page, RasterPage};
pub use render::{marker_png, render, render_symbol, symbol_matrix, RenderedSymbol, SymbolMatrix, MAX_SYMBOL_VERSION};

pub const PAGE_WIDTH_MM: f64 = 210.0;
pub const PAGE_HEIGHT_MM: f64 = 297.0;

pub const FIDUCIAL_SIZE_MM: f64 = 8.0;
/// Distance from each page edge to the outer edge of its marker.
pub const FIDUCIAL_OFFSET_MM: f64 = 6.0;

pub const SYMBOL_SIZE_MM: f64 = 30.0;
pub const SYMBOL_X_MM: f64 = PAGE_WIDTH_MM - 20.0 - SYMBOL_SIZE_MM;
pub const SYMBOL_Y_MM: f64 = FIDUCIAL_OFFSET_MM;

/// Baseline of the printed short code, under the symbol.
pub const SHORT_CODE_X_MM: f64 = SYMBOL_X_MM + 2.0;
pub const SHORT_CODE_Y_MM: f64 = SYMBOL_Y_MM + SYMBOL_SIZE_MM + 1.0;

/// Margins of the area left to page content: top, right, bottom, left.
pub const CONTENT_MARGINS_MM: (f64, f64, f64, f64) = (44.0, 20.0, 20.0, 20.0);

/// Centres of the four markers: top-left, top-right, bottom-left, bottom-right.
pub fn fiducial_centers_mm() -> [(f64, f64); 4] {
    let near = FIDUCIAL_OFFSET_MM + FIDUCIAL_SIZE_MM / 2.0;
    let far_x = PAGE_WIDTH_MM - near;
    let far_y = PAGE_HEIGHT_MM - near;
    [(near, near), (far_x, near), (near, far_y), (far_x, far_y)]
}
