use crate::symbol::{
    fiducial_centers_mm, SymbolMatrix, FIDUCIAL_SIZE_MM, SYMBOL_SIZE_MM, SYMBOL_X_MM, SYMBOL_Y_MM,
};

/// Something page marks can be drawn on: a PDF page area or a raster page.
pub trait MarkSurface {
    type Error;

    /// Fills a solid black square. Coordinates in mm from the page's top-left corner.
    fn fill_square(&mut self, x_mm: f64, y_mm: f64, side_mm: f64) -> Result<(), Self::Error>;

    fn draw_symbol(
        &mut self,
        symbol: &SymbolMatrix,
        x_mm: f64,
        y_mm: f64,
        side_mm: f64,
    ) -> Result<(), Self::Error>;
}

/// Stamps the four corner markers the deskew step looks for.
pub fn place_fiducials<S: MarkSurface>(surface: &mut S) -> Result<(), S::Error> {
    let half = FIDUCIAL_SIZE_MM / 2.0;
    for (cx, cy) in fiducial_centers_mm() {
        surface.fill_square(cx - half, cy - half, FIDUCIAL_SIZE_MM)?;
    }
    Ok(())
}

pub fn place_symbol<S: MarkSurface>(surface: &mut S, symbol: &SymbolMatrix) -> Result<(), S::Error> {
    surface.draw_symbol(symbol, SYMBOL_X_MM, SYMBOL_Y_MM, SYMBOL_SIZE_MM)
}
