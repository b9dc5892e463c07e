//! Square fiducial detection and decoding.
//!
//! Pipeline per frame:
//! 1. global threshold (Otsu unless configured) and dark connected components;
//! 2. coarse quad from boundary pixels by farthest-point construction;
//! 3. sub-pixel corners from line fits to the four outer edges;
//! 4. cell sampling through the canonical-square homography;
//! 5. border check and dictionary lookup under the four rotations.
//!
//! Image coordinates use the pixel-center convention: pixel `(i, j)` is
//! centered at `(i, j)`.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

use super::dictionary::{match_word, pack, MARKER_CELLS, PAYLOAD_CELLS};
use crate::homography::Homography;

/// A decoded marker. `corners[0]` is the marker's own top-left corner and the
/// rest follow clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarker {
    pub id: usize,
    pub corners: [[f64; 2]; 4],
    /// Payload bits corrected during decoding.
    pub hamming: u32,
}

impl DetectedMarker {
    /// Mean of the four corners.
    pub fn center(&self) -> [f64; 2] {
        let sx: f64 = self.corners.iter().map(|c| c[0]).sum();
        let sy: f64 = self.corners.iter().map(|c| c[1]).sum();
        [sx / 4.0, sy / 4.0]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarkerDetectorConfig {
    /// Fixed binarization level; unset uses Otsu's level per frame.
    pub threshold: Option<u8>,
    /// Smallest marker side in pixels.
    pub min_side_px: f64,
    /// Largest marker area as a fraction of the frame.
    pub max_area_fraction: f64,
    /// Payload bit errors that may be corrected.
    pub max_correction_bits: u32,
    /// Border cells allowed to read as white.
    pub max_border_errors: usize,
    /// Refine corners by fitting lines to the marker edges.
    pub refine_corners: bool,
}

impl Default for MarkerDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            min_side_px: 12.0,
            max_area_fraction: 0.25,
            max_correction_bits: 1,
            max_border_errors: 1,
            refine_corners: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarkerDetector {
    config: MarkerDetectorConfig,
}

struct Component {
    label: u32,
    pixels: Vec<[u32; 2]>,
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl MarkerDetector {
    pub fn new(config: MarkerDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarkerDetectorConfig {
        &self.config
    }

    pub fn detect(&self, gray: &GrayImage) -> Vec<DetectedMarker> {
        let level = self
            .config
            .threshold
            .unwrap_or_else(|| imageproc::contrast::otsu_level(gray));
        let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([if gray.get_pixel(x, y)[0] <= level { 255 } else { 0 }])
        });
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        let mut markers = Vec::new();
        for comp in self.candidate_components(&labels) {
            if let Some(m) = self.decode_component(gray, &labels, &comp, level) {
                markers.push(m);
            }
        }
        tracing::trace!(count = markers.len(), level, "marker detection");
        markers
    }

    fn candidate_components(
        &self,
        labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    ) -> Vec<Component> {
        let (w, h) = labels.dimensions();
        let mut comps: Vec<Option<Component>> = Vec::new();
        for (x, y, l) in labels.enumerate_pixels() {
            let label = l[0];
            if label == 0 {
                continue;
            }
            let idx = label as usize;
            if comps.len() <= idx {
                comps.resize_with(idx + 1, || None);
            }
            let c = comps[idx].get_or_insert_with(|| Component {
                label,
                pixels: Vec::new(),
                x0: x,
                x1: x,
                y0: y,
                y1: y,
            });
            c.pixels.push([x, y]);
            c.x0 = c.x0.min(x);
            c.x1 = c.x1.max(x);
            c.y0 = c.y0.min(y);
            c.y1 = c.y1.max(y);
        }

        let min_side = self.config.min_side_px;
        let max_area = self.config.max_area_fraction * (w as f64) * (h as f64);
        comps
            .into_iter()
            .flatten()
            .filter(|c| {
                let bw = (c.x1 - c.x0 + 1) as f64;
                let bh = (c.y1 - c.y0 + 1) as f64;
                let area = c.pixels.len() as f64;
                bw.max(bh) >= min_side
                    && bw.min(bh) >= 0.25 * min_side
                    && area >= 0.3 * min_side * min_side
                    && area <= max_area
                    && c.x0 > 0
                    && c.y0 > 0
                    && c.x1 + 1 < w
                    && c.y1 + 1 < h
            })
            .collect()
    }

    fn decode_component(
        &self,
        gray: &GrayImage,
        labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
        comp: &Component,
        level: u8,
    ) -> Option<DetectedMarker> {
        let boundary = boundary_pixels(labels, comp);
        let coarse = farthest_point_quad(&boundary, comp)?;
        let ordered = order_clockwise(coarse);
        let corners = if self.config.refine_corners {
            refine_corners(&boundary, &ordered).unwrap_or(ordered)
        } else {
            ordered
        };
        if quad_area(&corners) < 0.5 * self.config.min_side_px.powi(2) {
            return None;
        }

        let n = MARKER_CELLS as f64;
        let canonical = [[0.0, 0.0], [n, 0.0], [n, n], [0.0, n]];
        let h = Homography::fit(&canonical, &corners).ok()?;

        let mut white = [[false; MARKER_CELLS]; MARKER_CELLS];
        for (r, row) in white.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = sample_cell(gray, &h, r, c)? > level as f64;
            }
        }

        let last = MARKER_CELLS - 1;
        let border_errors = white
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().enumerate().map(move |(c, &w)| (r, c, w)))
            .filter(|&(r, c, w)| w && (r == 0 || c == 0 || r == last || c == last))
            .count();
        if border_errors > self.config.max_border_errors {
            return None;
        }

        let mut payload = [[false; PAYLOAD_CELLS]; PAYLOAD_CELLS];
        for (r, row) in payload.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = white[r + 1][c + 1];
            }
        }
        let m = match_word(pack(&payload), self.config.max_correction_bits)?;
        let k = m.rotation as usize;
        let corners = std::array::from_fn(|i| corners[(i + k) % 4]);
        tracing::trace!(label = comp.label, id = m.id, rotation = k, "decoded marker");
        Some(DetectedMarker {
            id: m.id,
            corners,
            hamming: m.distance,
        })
    }
}

fn boundary_pixels(
    labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    comp: &Component,
) -> Vec<[f64; 2]> {
    let (w, h) = labels.dimensions();
    let same = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && (x as u32) < w
            && (y as u32) < h
            && labels.get_pixel(x as u32, y as u32)[0] == comp.label
    };
    comp.pixels
        .iter()
        .filter(|&&[x, y]| {
            let (x, y) = (x as i64, y as i64);
            !(same(x - 1, y) && same(x + 1, y) && same(x, y - 1) && same(x, y + 1))
        })
        .map(|&[x, y]| [x as f64, y as f64])
        .collect()
}

/// Four extreme boundary points: the farthest from the box center, the
/// farthest from that one, and the extremes on either side of their diagonal.
fn farthest_point_quad(boundary: &[[f64; 2]], comp: &Component) -> Option<[[f64; 2]; 4]> {
    let center = [
        0.5 * (comp.x0 + comp.x1) as f64,
        0.5 * (comp.y0 + comp.y1) as f64,
    ];
    let dist2 = |a: &[f64; 2], b: &[f64; 2]| (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);
    let p0 = *boundary
        .iter()
        .max_by(|a, b| dist2(a, &center).total_cmp(&dist2(b, &center)))?;
    let p2 = *boundary
        .iter()
        .max_by(|a, b| dist2(a, &p0).total_cmp(&dist2(b, &p0)))?;
    let side = |p: &[f64; 2]| (p2[0] - p0[0]) * (p[1] - p0[1]) - (p2[1] - p0[1]) * (p[0] - p0[0]);
    let p1 = *boundary.iter().max_by(|a, b| side(a).total_cmp(&side(b)))?;
    let p3 = *boundary.iter().min_by(|a, b| side(a).total_cmp(&side(b)))?;
    let diag = dist2(&p0, &p2).sqrt();
    if side(&p1) <= 0.2 * diag * diag || side(&p3) >= -0.2 * diag * diag {
        return None;
    }
    Some([p0, p1, p2, p3])
}

/// Clockwise on screen (y down), starting from the corner nearest the image origin.
fn order_clockwise(quad: [[f64; 2]; 4]) -> [[f64; 2]; 4] {
    let cx = quad.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = quad.iter().map(|p| p[1]).sum::<f64>() / 4.0;
    let mut pts = quad;
    pts.sort_by(|a, b| {
        let ta = (a[1] - cy).atan2(a[0] - cx);
        let tb = (b[1] - cy).atan2(b[0] - cx);
        ta.total_cmp(&tb)
    });
    let start = (0..4)
        .min_by(|&i, &j| (pts[i][0] + pts[i][1]).total_cmp(&(pts[j][0] + pts[j][1])))
        .unwrap_or(0);
    std::array::from_fn(|i| pts[(start + i) % 4])
}

fn quad_area(q: &[[f64; 2]; 4]) -> f64 {
    let mut acc = 0.0;
    for i in 0..4 {
        let a = q[i];
        let b = q[(i + 1) % 4];
        acc += a[0] * b[1] - b[0] * a[1];
    }
    0.5 * acc.abs()
}

/// Line `n · p = d` with unit normal pointing away from the quad.
#[derive(Clone, Copy)]
struct EdgeLine {
    n: [f64; 2],
    d: f64,
}

fn fit_edge(points: &[[f64; 2]], inside: [f64; 2]) -> Option<EdgeLine> {
    if points.len() < 3 {
        return None;
    }
    let k = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / k;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / k;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p[0] - mx, p[1] - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    // Normal = eigenvector of the smaller covariance eigenvalue.
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let mut n = [-theta.sin(), theta.cos()];
    if n[0] * (inside[0] - mx) + n[1] * (inside[1] - my) > 0.0 {
        n = [-n[0], -n[1]];
    }
    // Boundary pixel centers sit inside the true edge by half a pixel footprint.
    let shift = 0.5 * (n[0].abs() + n[1].abs());
    Some(EdgeLine {
        n,
        d: n[0] * mx + n[1] * my + shift,
    })
}

fn intersect(a: EdgeLine, b: EdgeLine) -> Option<[f64; 2]> {
    let det = a.n[0] * b.n[1] - a.n[1] * b.n[0];
    if det.abs() < 1e-9 {
        return None;
    }
    Some([
        (a.d * b.n[1] - a.n[1] * b.d) / det,
        (a.n[0] * b.d - a.d * b.n[0]) / det,
    ])
}

fn refine_corners(boundary: &[[f64; 2]], quad: &[[f64; 2]; 4]) -> Option<[[f64; 2]; 4]> {
    let cx = quad.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = quad.iter().map(|p| p[1]).sum::<f64>() / 4.0;
    let mut lines = [EdgeLine { n: [0.0, 0.0], d: 0.0 }; 4];
    for (i, line) in lines.iter_mut().enumerate() {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let (ex, ey) = (b[0] - a[0], b[1] - a[1]);
        let len = ex.hypot(ey);
        if len < 1e-9 {
            return None;
        }
        let support: Vec<[f64; 2]> = boundary
            .iter()
            .copied()
            .filter(|p| {
                let (px, py) = (p[0] - a[0], p[1] - a[1]);
                let t = (px * ex + py * ey) / (len * len);
                let dist = (px * ey - py * ex).abs() / len;
                (0.15..=0.85).contains(&t) && dist < 1.5
            })
            .collect();
        *line = fit_edge(&support, [cx, cy])?;
    }
    let mut out = [[0.0; 2]; 4];
    for (i, corner) in out.iter_mut().enumerate() {
        *corner = intersect(lines[(i + 3) % 4], lines[i])?;
    }
    let moved = out
        .iter()
        .zip(quad)
        .all(|(r, q)| (r[0] - q[0]).hypot(r[1] - q[1]) < 3.0);
    moved.then_some(out)
}

/// Mean intensity of five samples around a cell center.
fn sample_cell(gray: &GrayImage, h: &Homography, row: usize, col: usize) -> Option<f64> {
    const OFFSETS: [[f64; 2]; 5] = [[0.0, 0.0], [-0.2, -0.2], [0.2, -0.2], [0.2, 0.2], [-0.2, 0.2]];
    let (w, hgt) = gray.dimensions();
    let mut acc = 0.0;
    for o in OFFSETS {
        let p = h.project([col as f64 + 0.5 + o[0], row as f64 + 0.5 + o[1]]);
        let x = p[0].round();
        let y = p[1].round();
        if !(x >= 0.0 && y >= 0.0 && x < w as f64 && y < hgt as f64) {
            return None;
        }
        acc += gray.get_pixel(x as u32, y as u32)[0] as f64;
    }
    Some(acc / OFFSETS.len() as f64)
}
