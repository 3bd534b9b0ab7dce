use crate::booklet::plan::BookletPlan;
use crate::error::RenderError;
use crate::symbol::{
    marker_png, place_fiducials, place_symbol, MarkSurface, RenderedSymbol, SymbolMatrix,
};
use crate::symbol::{
    CONTENT_MARGINS_MM, FIDUCIAL_OFFSET_MM, FIDUCIAL_SIZE_MM, PAGE_HEIGHT_MM, SHORT_CODE_X_MM,
    SHORT_CODE_Y_MM, SYMBOL_SIZE_MM,
};
use genpdf::elements::Image as PdfImage;
use genpdf::error::{Error as PdfError, ErrorKind as PdfErrorKind};
use genpdf::render::Area;
use genpdf::style::Style;
use genpdf::{Context, Element, Margins, PageDecorator, Position};
use std::io::Write;
use tempfile::Builder;

struct DecoratorStamp {
    image: PdfImage,
    matrix: SymbolMatrix,
    short_code: String,
    footer: String,
}

/// Pixels per side of the embedded marker image; its DPI sets the printed size.
pub const MARKER_PX: u32 = 32;

/// Draws the planned stamp on each new page, then hands the remaining area to
/// the layout. Pages beyond the plan fail the render.
pub struct StampDecorator {
    stamps: Vec<DecoratorStamp>,
    marker: PdfImage,
    next: usize,
}

// genpdf links its own image crate version and picks the decoder by
// extension, so PNGs go through a `.png` file.
fn pdf_image(png: &[u8], dpi: f64) -> Result<PdfImage, RenderError> {
    let mut tmp = Builder::new().suffix(".png").tempfile()?;
    tmp.as_file_mut().write_all(png)?;
    let mut image = PdfImage::from_path(tmp.path()).map_err(|e| RenderError::Pdf(e.to_string()))?;
    image.set_dpi(dpi);
    Ok(image)
}

fn dpi_for(pixels: u32, side_mm: f64) -> f64 {
    pixels as f64 * 25.4 / side_mm
}

impl StampDecorator {
    pub fn from_plan(plan: &BookletPlan) -> Result<Self, RenderError> {
        let total = plan.layout.total_pages();
        let mut stamps = Vec::with_capacity(plan.page_count());
        for booklet in &plan.booklets {
            for page in &booklet.pages {
                stamps.push(DecoratorStamp {
                    image: pdf_image(&page.symbol.png, symbol_dpi(&page.symbol))?,
                    matrix: page.symbol.matrix.clone(),
                    short_code: page.short_code.clone(),
                    footer: format!(
                        "{}  |  page {} of {}",
                        booklet.participant.full_name, page.payload.page_number, total
                    ),
                });
            }
        }
        let marker = pdf_image(&marker_png(MARKER_PX)?, dpi_for(MARKER_PX, FIDUCIAL_SIZE_MM))?;
        Ok(Self {
            stamps,
            marker,
            next: 0,
        })
    }
}

fn symbol_dpi(symbol: &RenderedSymbol) -> f64 {
    dpi_for(symbol.pixel_size, SYMBOL_SIZE_MM)
}

impl PageDecorator for StampDecorator {
    fn decorate_page<'a>(
        &mut self,
        context: &Context,
        mut area: Area<'a>,
        style: Style,
    ) -> Result<Area<'a>, PdfError> {
        let page = self.next + 1;
        let stamp = self.stamps.get_mut(self.next).ok_or_else(|| {
            PdfError::new(
                format!("page {} has no planned identifier; content overflowed", page),
                PdfErrorKind::Internal,
            )
        })?;
        self.next += 1;

        let mut surface = PdfSurface {
            area: &area,
            context,
            style,
            marker_image: &mut self.marker,
            symbol_image: &mut stamp.image,
        };
        place_fiducials(&mut surface)?;
        place_symbol(&mut surface, &stamp.matrix)?;

        area.print_str(
            &context.font_cache,
            Position::new(SHORT_CODE_X_MM, SHORT_CODE_Y_MM),
            style.bold().with_font_size(12),
            &stamp.short_code,
        )?;
        area.print_str(
            &context.font_cache,
            Position::new(
                CONTENT_MARGINS_MM.3,
                PAGE_HEIGHT_MM - FIDUCIAL_OFFSET_MM - FIDUCIAL_SIZE_MM,
            ),
            style.with_font_size(8),
            &stamp.footer,
        )?;

        let (top, right, bottom, left) = CONTENT_MARGINS_MM;
        area.add_margins(Margins::trbl(top, right, bottom, left));
        Ok(area)
    }
}

/// Page area of the PDF being rendered. Markers and the symbol are embedded
/// images: the solid marker PNG and the pre-rendered PNG of the same matrix.
struct PdfSurface<'s, 'a> {
    area: &'s Area<'a>,
    context: &'s Context,
    style: Style,
    marker_image: &'s mut PdfImage,
    symbol_image: &'s mut PdfImage,
}

/// Renders `image` with its top-left corner at the given page position.
fn place(
    area: &Area<'_>,
    context: &Context,
    style: Style,
    image: &mut PdfImage,
    x_mm: f64,
    y_mm: f64,
) -> Result<(), PdfError> {
    let mut target = area.clone();
    target.add_offset(Position::new(x_mm, y_mm));
    image.render(context, target, style).map(|_| ())
}

impl MarkSurface for PdfSurface<'_, '_> {
    type Error = PdfError;

    fn fill_square(&mut self, x_mm: f64, y_mm: f64, side_mm: f64) -> Result<(), PdfError> {
        self.marker_image.set_dpi(dpi_for(MARKER_PX, side_mm));
        place(self.area, self.context, self.style, self.marker_image, x_mm, y_mm)
    }

    fn draw_symbol(
        &mut self,
        _symbol: &SymbolMatrix,
        x_mm: f64,
        y_mm: f64,
        _side_mm: f64,
    ) -> Result<(), PdfError> {
        place(self.area, self.context, self.style, self.symbol_image, x_mm, y_mm)
    }
}
