use crate::error::RenderError;
use image::{GrayImage, Luma};
use png::{BitDepth as PngBitDepth, ColorType as PngColorType, Encoder as PngEncoder};
use qrcode::{Color, EcLevel, QrCode, Version};

/// Largest QR version that still prints legibly in the symbol footprint.
pub const MAX_SYMBOL_VERSION: i16 = 10;
const QUIET_ZONE_MODULES: usize = 4;
const PNG_MODULE_PX: u32 = 10;

/// Module grid of a QR symbol, quiet zone included.
#[derive(Debug, Clone)]
pub struct SymbolMatrix {
    width: usize,
    dark: Vec<bool>,
}

impl SymbolMatrix {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.width && self.dark[y * self.width + x]
    }

    pub fn to_image(&self, module_px: u32) -> GrayImage {
        let side = self.width as u32 * module_px;
        GrayImage::from_fn(side, side, |x, y| {
            let dark = self.is_dark((x / module_px) as usize, (y / module_px) as usize);
            Luma([if dark { 0 } else { 255 }])
        })
    }
}

pub struct RenderedSymbol {
    pub matrix: SymbolMatrix,
    /// RGB PNG, `pixel_size` pixels square.
    pub png: Vec<u8>,
    pub pixel_size: u32,
}

/// Payloads always use level H; they come back through print, scan and JPEG
/// recompression.
pub fn symbol_matrix(compact: &str) -> Result<SymbolMatrix, RenderError> {
    let code = QrCode::with_error_correction_level(compact.as_bytes(), EcLevel::H)
        .map_err(|e| RenderError::Symbol(e.to_string()))?;
    match code.version() {
        Version::Normal(v) if v <= MAX_SYMBOL_VERSION => {}
        Version::Normal(v) => return Err(RenderError::PayloadTooLarge(v)),
        Version::Micro(_) => return Err(RenderError::Symbol("unexpected micro QR".into())),
    }

    let inner = code.width();
    let colors = code.to_colors();
    let width = inner + 2 * QUIET_ZONE_MODULES;
    let mut dark = vec![false; width * width];
    for y in 0..inner {
        for x in 0..inner {
            if colors[y * inner + x] == Color::Dark {
                dark[(y + QUIET_ZONE_MODULES) * width + x + QUIET_ZONE_MODULES] = true;
            }
        }
    }
    Ok(SymbolMatrix { width, dark })
}

pub fn render(compact: &str) -> Result<RenderedSymbol, RenderError> {
    let matrix = symbol_matrix(compact)?;
    let image = matrix.to_image(PNG_MODULE_PX);
    let pixel_size = image.width();
    let png = encode_rgb_png(&image)?;
    Ok(RenderedSymbol {
        matrix,
        png,
        pixel_size,
    })
}

/// A solid black square, `side_px` pixels wide, as an RGB PNG.
pub fn marker_png(side_px: u32) -> Result<Vec<u8>, RenderError> {
    encode_rgb_png(&GrayImage::from_pixel(side_px, side_px, Luma([0])))
}

/// PNG bytes of the symbol for `compact`.
pub fn render_symbol(compact: &str) -> Result<Vec<u8>, RenderError> {
    Ok(render(compact)?.png)
}

// genpdf embeds RGB without alpha reliably, so the symbol is widened to RGB.
fn encode_rgb_png(image: &GrayImage) -> Result<Vec<u8>, RenderError> {
    let (w, h) = image.dimensions();
    let raw: Vec<u8> = image.pixels().flat_map(|p| [p.0[0]; 3]).collect();
    let mut out = Vec::new();
    {
        let mut encoder = PngEncoder::new(&mut out, w, h);
        encoder.set_color(PngColorType::Rgb);
        encoder.set_depth(PngBitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| RenderError::Image(e.to_string()))?;
        writer
            .write_image_data(&raw)
            .map_err(|e| RenderError::Image(e.to_string()))?;
        writer.finish().map_err(|e| RenderError::Image(e.to_string()))?;
    }
    Ok(out)
}
