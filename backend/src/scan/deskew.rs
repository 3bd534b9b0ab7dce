//! Perspective correction from the four corner fiducials.
//!
//! Markers are found as dark connected components whose second moment matches
//! a solid square, one per image quadrant. Their centres are mapped onto the
//! canonical marker positions and the page is resampled onto a straight A4
//! raster at the resolution the markers were scanned at.

use crate::error::GeometryFailure;
use crate::symbol::{fiducial_centers_mm, FIDUCIAL_SIZE_MM, PAGE_HEIGHT_MM, PAGE_WIDTH_MM};
use image::{GrayImage, Luma};
use log::debug;

/// `(mu20 + mu02) / area^2` is 1/6 for a solid square at any rotation.
const SQUARENESS_RANGE: (f64, f64) = (0.15, 0.19);
/// Accepted blob area relative to a marker on a page filling the image.
const AREA_RANGE: (f64, f64) = (0.2, 4.0);
const MAX_OPPOSITE_SIDE_RATIO: f64 = 1.5;
const ASPECT_TOLERANCE: f64 = 0.25;
/// Output resolutions are multiples of this, so a slightly stretched scan
/// keeps the nominal page size.
const DPI_STEP: u32 = 50;
const MAX_OUTPUT_DPI: u32 = 600;

pub type Point = (f64, f64);

/// Straightens `image` onto an A4 raster, at the resolution measured from the
/// marker spacing but never below `min_dpi`.
pub fn deskew(image: &GrayImage, min_dpi: u32) -> Result<GrayImage, GeometryFailure> {
    let markers = locate_fiducials(image)?;
    check_geometry(&markers)?;

    let dpi = output_dpi(&markers, min_dpi);
    debug!("Deskewing onto a {} dpi page", dpi);
    let px_per_mm = dpi as f64 / 25.4;
    let targets = fiducial_centers_mm().map(|(x, y)| (x * px_per_mm, y * px_per_mm));
    let homography = Homography::between(&targets, &markers).ok_or(GeometryFailure::Degenerate)?;

    let width = (PAGE_WIDTH_MM * px_per_mm).round() as u32;
    let height = (PAGE_HEIGHT_MM * px_per_mm).round() as u32;
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let (u, v) = homography.apply(x as f64, y as f64);
        Luma([sample_bilinear(image, u, v)])
    }))
}

pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total = image.width() as u64 * image.height() as u64;
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();

    let mut background = 0u64;
    let mut weighted_background = 0.0;
    let mut best_variance = -1.0;
    let mut threshold = 0u8;
    for (value, &count) in histogram.iter().enumerate() {
        background += count;
        if background == 0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0 {
            break;
        }
        weighted_background += value as f64 * count as f64;
        let mean_b = weighted_background / background as f64;
        let mean_f = (weighted_total - weighted_background) / foreground as f64;
        let variance = background as f64 * foreground as f64 * (mean_b - mean_f).powi(2);
        if variance > best_variance {
            best_variance = variance;
            threshold = value as u8;
        }
    }
    threshold
}

#[derive(Debug, Clone)]
struct Blob {
    area: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    touches_border: bool,
}

impl Blob {
    fn centroid(&self) -> Point {
        (self.sum_x / self.area, self.sum_y / self.area)
    }

    fn squareness(&self) -> f64 {
        let (cx, cy) = self.centroid();
        let mu20 = self.sum_xx - self.area * cx * cx;
        let mu02 = self.sum_yy - self.area * cy * cy;
        (mu20 + mu02) / (self.area * self.area)
    }
}

/// Dark 4-connected components of the thresholded image.
fn dark_components(image: &GrayImage) -> Vec<Blob> {
    let threshold = otsu_threshold(image);
    let (width, height) = (image.width() as usize, image.height() as usize);
    let dark: Vec<bool> = image.pixels().map(|p| p.0[0] <= threshold).collect();
    let mut seen = vec![false; dark.len()];
    let mut blobs = Vec::new();
    let mut stack = Vec::new();

    for start in 0..dark.len() {
        if !dark[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        let mut blob = Blob {
            area: 0.0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            touches_border: false,
        };
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            let (fx, fy) = (x as f64, y as f64);
            blob.area += 1.0;
            blob.sum_x += fx;
            blob.sum_y += fy;
            blob.sum_xx += fx * fx;
            blob.sum_yy += fy * fy;
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                blob.touches_border = true;
            }
            let mut visit = |n: usize| {
                if dark[n] && !seen[n] {
                    seen[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }
        blobs.push(blob);
    }
    blobs
}

/// Marker centres in image pixels: top-left, top-right, bottom-left,
/// bottom-right.
pub fn locate_fiducials(image: &GrayImage) -> Result<[Point; 4], GeometryFailure> {
    let (width, height) = (image.width() as f64, image.height() as f64);
    let px_per_mm = width.min(height) / PAGE_WIDTH_MM;
    let expected_area = (FIDUCIAL_SIZE_MM * px_per_mm).powi(2);
    let (min_area, max_area) = (expected_area * AREA_RANGE.0, expected_area * AREA_RANGE.1);
    let centre = (width / 2.0, height / 2.0);

    let mut best: [Option<(Point, f64)>; 4] = [None; 4];
    let mut candidates = 0;
    for blob in dark_components(image) {
        if blob.touches_border || blob.area < min_area || blob.area > max_area {
            continue;
        }
        let j = blob.squareness();
        if j < SQUARENESS_RANGE.0 || j > SQUARENESS_RANGE.1 {
            continue;
        }
        candidates += 1;
        let c = blob.centroid();
        let quadrant = (c.0 >= centre.0) as usize + 2 * (c.1 >= centre.1) as usize;
        let distance = distance(c, centre);
        if best[quadrant].map_or(true, |(_, d)| distance > d) {
            best[quadrant] = Some((c, distance));
        }
    }
    debug!("Fiducial search: {} square candidates", candidates);

    let found = best.iter().filter(|b| b.is_some()).count();
    match best {
        [Some(tl), Some(tr), Some(bl), Some(br)] => Ok([tl.0, tr.0, bl.0, br.0]),
        _ => Err(GeometryFailure::MarkersNotFound { found }),
    }
}

/// Source resolution from the marker spacing, rounded to `DPI_STEP`, capped
/// at `MAX_OUTPUT_DPI` and raised to `min_dpi`.
pub fn output_dpi(markers: &[Point; 4], min_dpi: u32) -> u32 {
    let [tl, tr, bl, br] = *markers;
    let [ptl, ptr, pbl, _] = fiducial_centers_mm();
    let across = (distance(tl, tr) + distance(bl, br)) / (2.0 * distance(ptl, ptr));
    let down = (distance(tl, bl) + distance(tr, br)) / (2.0 * distance(ptl, pbl));
    let measured = (across + down) / 2.0 * 25.4;
    let snapped = (measured / DPI_STEP as f64).round() as u32 * DPI_STEP;
    snapped.min(MAX_OUTPUT_DPI).max(min_dpi)
}

fn distance(a: Point, b: Point) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// The four centres must form a convex quadrilateral with roughly the
/// proportions of the printed marker rectangle.
pub fn check_geometry(markers: &[Point; 4]) -> Result<(), GeometryFailure> {
    let [tl, tr, bl, br] = *markers;
    let (top, bottom) = (distance(tl, tr), distance(bl, br));
    let (left, right) = (distance(tl, bl), distance(tr, br));
    if top.min(bottom).min(left).min(right) < 1.0 {
        return Err(GeometryFailure::Degenerate);
    }

    let ring = [tl, tr, br, bl];
    let turns: Vec<f64> = (0..4)
        .map(|i| cross(ring[i], ring[(i + 1) % 4], ring[(i + 2) % 4]))
        .collect();
    if !(turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0)) {
        return Err(GeometryFailure::Inconsistent("markers do not form a convex quadrilateral".into()));
    }

    let ratio = |a: f64, b: f64| a.max(b) / a.min(b);
    if ratio(top, bottom) > MAX_OPPOSITE_SIDE_RATIO || ratio(left, right) > MAX_OPPOSITE_SIDE_RATIO {
        return Err(GeometryFailure::Inconsistent("opposite sides differ too much".into()));
    }

    let [ptl, ptr, pbl, _] = fiducial_centers_mm();
    let expected = distance(ptl, pbl) / distance(ptl, ptr);
    let measured = ((left + right) / 2.0) / ((top + bottom) / 2.0);
    if (measured / expected - 1.0).abs() > ASPECT_TOLERANCE {
        return Err(GeometryFailure::Inconsistent(format!(
            "aspect ratio {:.2} does not match {:.2}",
            measured, expected
        )));
    }
    Ok(())
}

/// Projective map from canonical page pixels to source image pixels.
#[derive(Debug, Clone, Copy)]
pub struct Homography([f64; 8]);

impl Homography {
    /// Map sending each `from[i]` to `to[i]`; `None` when the points are
    /// degenerate.
    pub fn between(from: &[Point; 4], to: &[Point; 4]) -> Option<Self> {
        let mut m = [[0.0f64; 9]; 8];
        for i in 0..4 {
            let ((x, y), (u, v)) = (from[i], to[i]);
            m[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
            m[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
        }
        solve(m).map(Homography)
    }

    pub fn apply(&self, x: f64, y: f64) -> Point {
        let h = &self.0;
        let w = h[6] * x + h[7] * y + 1.0;
        (
            (h[0] * x + h[1] * y + h[2]) / w,
            (h[3] * x + h[4] * y + h[5]) / w,
        )
    }
}

/// Gauss-Jordan elimination with partial pivoting on an 8x8 augmented system.
fn solve(mut m: [[f64; 9]; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-10 {
            return None;
        }
        m.swap(col, pivot);
        let lead = m[col][col];
        for k in col..9 {
            m[col][k] /= lead;
        }
        for row in 0..8 {
            if row != col {
                let factor = m[row][col];
                if factor != 0.0 {
                    for k in col..9 {
                        m[row][k] -= factor * m[col][k];
                    }
                }
            }
        }
    }
    let mut h = [0.0; 8];
    for (i, row) in m.iter().enumerate() {
        h[i] = row[8];
    }
    Some(h)
}

/// White outside the source image.
fn sample_bilinear(image: &GrayImage, u: f64, v: f64) -> u8 {
    let (w, h) = (image.width() as f64, image.height() as f64);
    if !(u >= 0.0 && v >= 0.0 && u <= w - 1.0 && v <= h - 1.0) {
        return 255;
    }
    let (x0, y0) = (u.floor(), v.floor());
    let (fx, fy) = (u - x0, v - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let p = |x: u32, y: u32| image.get_pixel(x, y).0[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::decode::find_identifier;
    use crate::symbol::stamp_page;
    use common::model::identifier::IdentifierPayload;
    use uuid::Uuid;

    /// Rotates about the centre onto a larger white canvas.
    fn rotate(image: &GrayImage, degrees: f64) -> GrayImage {
        let (w, h) = (image.width() as f64, image.height() as f64);
        let (out_w, out_h) = ((w * 1.4) as u32, (h * 1.3) as u32);
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (cx, cy) = (w / 2.0, h / 2.0);
        let (ox, oy) = (out_w as f64 / 2.0, out_h as f64 / 2.0);
        GrayImage::from_fn(out_w, out_h, |x, y| {
            let (dx, dy) = (x as f64 - ox, y as f64 - oy);
            let u = cos * dx + sin * dy + cx;
            let v = -sin * dx + cos * dy + cy;
            Luma([sample_bilinear(image, u, v)])
        })
    }

    fn filled_square(side: u32, hole: u32) -> GrayImage {
        let canvas = side + 40;
        GrayImage::from_fn(canvas, canvas, |x, y| {
            let inside = |lo: u32, hi: u32| x >= lo && x < hi && y >= lo && y < hi;
            let dark = inside(20, 20 + side) && !(hole > 0 && inside(20 + (side - hole) / 2, 20 + (side + hole) / 2));
            Luma([if dark { 0 } else { 255 }])
        })
    }

    #[test]
    fn otsu_splits_bimodal_histogram() {
        let image = GrayImage::from_fn(100, 10, |x, _| Luma([if x < 30 { 20 } else { 230 }]));
        let t = otsu_threshold(&image);
        assert!((20..230).contains(&t));
    }

    #[test]
    fn solid_square_passes_squareness_and_ring_does_not() {
        let solid = dark_components(&filled_square(60, 0));
        assert_eq!(solid.len(), 1);
        assert!((solid[0].squareness() - 1.0 / 6.0).abs() < 0.01);

        let ring = dark_components(&filled_square(60, 40));
        assert_eq!(ring.len(), 1);
        assert!(ring[0].squareness() > SQUARENESS_RANGE.1);
    }

    #[test]
    fn homography_recovers_a_known_map() {
        let from = [(0.0, 0.0), (100.0, 0.0), (0.0, 200.0), (100.0, 200.0)];
        let to = [(10.0, 5.0), (110.0, 15.0), (0.0, 205.0), (100.0, 215.0)];
        let h = Homography::between(&from, &to).unwrap();
        for (f, t) in from.iter().zip(to.iter()) {
            let (u, v) = h.apply(f.0, f.1);
            assert!((u - t.0).abs() < 1e-6 && (v - t.1).abs() < 1e-6);
        }
        let collapsed = [(0.0, 0.0); 4];
        assert!(Homography::between(&from, &collapsed).is_none());
    }

    #[test]
    fn rotated_scan_is_straightened() {
        let payload = IdentifierPayload::new(Uuid::new_v4(), Uuid::new_v4(), 4).unwrap();
        let page = stamp_page(&payload, 150).unwrap();
        let tilted = rotate(&page, 12.0);

        let straight = deskew(&tilted, 150).unwrap();
        assert_eq!(straight.dimensions(), page.dimensions());
        let px_per_mm = 150.0 / 25.4;
        for (cx, cy) in fiducial_centers_mm() {
            let px = straight.get_pixel((cx * px_per_mm) as u32, (cy * px_per_mm) as u32);
            assert!(px.0[0] < 128, "marker at ({}, {}) mm is missing", cx, cy);
        }
        assert_eq!(find_identifier(&straight).unwrap(), payload);
    }

    #[test]
    fn output_resolution_follows_the_scan() {
        let at = |dpi: f64| fiducial_centers_mm().map(|(x, y)| (x * dpi / 25.4, y * dpi / 25.4));
        assert_eq!(output_dpi(&at(600.0), 200), 600);
        assert_eq!(output_dpi(&at(391.0), 200), 400);
        assert_eq!(output_dpi(&at(301.5), 200), 300);
        assert_eq!(output_dpi(&at(1200.0), 200), MAX_OUTPUT_DPI);
        assert_eq!(output_dpi(&at(96.0), 200), 200);
        assert_eq!(output_dpi(&at(600.0), 720), 720);
    }

    #[test]
    fn sharp_scan_keeps_its_resolution() {
        let payload = IdentifierPayload::new(Uuid::new_v4(), Uuid::new_v4(), 2).unwrap();
        let page = stamp_page(&payload, 250).unwrap();
        let tilted = rotate(&page, -7.0);
        let straight = deskew(&tilted, 200).unwrap();
        assert_eq!(straight.dimensions(), page.dimensions());
        assert_eq!(find_identifier(&straight).unwrap(), payload);
    }

    #[test]
    fn covered_marker_is_reported() {
        let payload = IdentifierPayload::new(Uuid::new_v4(), Uuid::new_v4(), 1).unwrap();
        let mut page = stamp_page(&payload, 100).unwrap();
        let px_per_mm = 100.0 / 25.4;
        let (x0, y0) = ((2.0 * px_per_mm) as u32, (279.0 * px_per_mm) as u32);
        for y in y0..y0 + (14.0 * px_per_mm) as u32 {
            for x in x0..x0 + (14.0 * px_per_mm) as u32 {
                page.put_pixel(x, y, Luma([255]));
            }
        }
        assert_eq!(
            locate_fiducials(&page),
            Err(GeometryFailure::MarkersNotFound { found: 3 })
        );
        let blank = GrayImage::from_pixel(827, 1169, Luma([255]));
        assert_eq!(
            locate_fiducials(&blank),
            Err(GeometryFailure::MarkersNotFound { found: 0 })
        );
    }

    #[test]
    fn skewed_marker_layout_is_inconsistent() {
        let squashed = [(10.0, 10.0), (400.0, 10.0), (10.0, 120.0), (400.0, 120.0)];
        assert!(matches!(check_geometry(&squashed), Err(GeometryFailure::Inconsistent(_))));
        let crossed = [(10.0, 10.0), (200.0, 300.0), (10.0, 300.0), (200.0, 10.0)];
        assert!(check_geometry(&crossed).is_err());
    }
}
