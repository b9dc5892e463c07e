//! Dark-pupil ellipse detector.
//!
//! Under IR illumination the pupil is the darkest compact blob of the eye image.
//! The detector thresholds the darkest intensities, keeps the most disc-like
//! connected component of plausible size, samples its outer contour and fits an
//! ellipse with RANSAC. Bright corneal reflections inside the pupil only punch
//! holes into the blob and do not disturb the outer contour.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

use crate::conic::{fit_ellipse_ransac, EllipseRansacConfig};

/// Detected pupil outline. Axis lengths are full lengths (diameters) in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PupilEllipse {
    pub center_x: f64,
    pub center_y: f64,
    pub major_axis: f64,
    pub minor_axis: f64,
    /// Major-axis orientation from +x, radians.
    pub angle: f64,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
}

impl PupilEllipse {
    /// Zero-confidence result reported when no pupil is found.
    pub fn none() -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            major_axis: 0.0,
            minor_axis: 0.0,
            angle: 0.0,
            confidence: 0.0,
        }
    }

    pub fn diameter(&self) -> f64 {
        self.major_axis
    }
}

/// A pupil detector never fails: it reports low confidence instead.
pub trait PupilDetector {
    fn detect(&self, gray: &GrayImage) -> PupilEllipse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PupilDetectorConfig {
    /// Minimum plausible pupil diameter in pixels.
    pub pupil_size_min: f64,
    /// Maximum plausible pupil diameter in pixels.
    pub pupil_size_max: f64,
    /// Fraction of pixels defining the dark reference level.
    pub dark_percentile: f64,
    /// Intensity band above the dark reference that still counts as pupil.
    pub intensity_margin: u8,
    /// Maximum bounding-box aspect ratio of a candidate blob.
    pub max_aspect: f64,
    pub ransac: EllipseRansacConfig,
}

impl Default for PupilDetectorConfig {
    fn default() -> Self {
        Self {
            pupil_size_min: 25.0,
            pupil_size_max: 200.0,
            dark_percentile: 0.01,
            intensity_margin: 40,
            max_aspect: 3.0,
            ransac: EllipseRansacConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DarkPupilDetector {
    config: PupilDetectorConfig,
}

#[derive(Debug, Clone, Copy)]
struct Blob {
    label: u32,
    area: usize,
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl Blob {
    fn new(label: u32, x: u32, y: u32) -> Self {
        Self {
            label,
            area: 0,
            x0: x,
            x1: x,
            y0: y,
            y1: y,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.area += 1;
        self.x0 = self.x0.min(x);
        self.x1 = self.x1.max(x);
        self.y0 = self.y0.min(y);
        self.y1 = self.y1.max(y);
    }

    fn width(&self) -> f64 {
        (self.x1 - self.x0 + 1) as f64
    }

    fn height(&self) -> f64 {
        (self.y1 - self.y0 + 1) as f64
    }

    /// Area relative to the ellipse inscribed in the bounding box.
    fn fill(&self) -> f64 {
        self.area as f64 / (std::f64::consts::FRAC_PI_4 * self.width() * self.height())
    }

    fn touches_border(&self, w: u32, h: u32) -> bool {
        self.x0 == 0 || self.y0 == 0 || self.x1 + 1 >= w || self.y1 + 1 >= h
    }
}

impl DarkPupilDetector {
    pub fn new(config: PupilDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PupilDetectorConfig {
        &self.config
    }

    fn dark_threshold(&self, gray: &GrayImage) -> u8 {
        let mut hist = [0usize; 256];
        for p in gray.pixels() {
            hist[p[0] as usize] += 1;
        }
        let n = gray.pixels().len();
        let target = ((n as f64) * self.config.dark_percentile).ceil().max(1.0) as usize;
        let mut acc = 0usize;
        let mut reference = 0u8;
        for (level, &count) in hist.iter().enumerate() {
            acc += count;
            if acc >= target {
                reference = level as u8;
                break;
            }
        }
        let otsu = imageproc::contrast::otsu_level(gray);
        reference.saturating_add(self.config.intensity_margin).min(otsu)
    }

    fn select_blob(&self, labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>) -> Option<Blob> {
        let (w, h) = labels.dimensions();
        let mut blobs: Vec<Option<Blob>> = Vec::new();
        for (x, y, l) in labels.enumerate_pixels() {
            let label = l[0];
            if label == 0 {
                continue;
            }
            let idx = label as usize;
            if blobs.len() <= idx {
                blobs.resize(idx + 1, None);
            }
            blobs[idx]
                .get_or_insert_with(|| Blob::new(label, x, y))
                .add(x, y);
        }

        let min_area = std::f64::consts::FRAC_PI_4 * self.config.pupil_size_min.powi(2);
        let max_area = std::f64::consts::FRAC_PI_4 * self.config.pupil_size_max.powi(2);
        blobs
            .into_iter()
            .flatten()
            .filter(|b| {
                let area = b.area as f64;
                let aspect = b.width().max(b.height()) / b.width().min(b.height());
                area >= min_area
                    && area <= max_area
                    && aspect <= self.config.max_aspect
                    && !b.touches_border(w, h)
            })
            .min_by(|a, b| {
                let da = (1.0 - a.fill()).abs();
                let db = (1.0 - b.fill()).abs();
                da.total_cmp(&db).then(b.area.cmp(&a.area))
            })
    }
}

/// Outer contour of a labelled blob, sampled at pixel edges.
///
/// Each row contributes its leftmost and rightmost edge, each column its top
/// and bottom edge; interior holes are never visited.
fn outer_contour(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>, blob: &Blob) -> Vec<[f64; 2]> {
    let mut pts = Vec::new();
    let is_in = |x: u32, y: u32| labels.get_pixel(x, y)[0] == blob.label;
    for y in blob.y0..=blob.y1 {
        let mut xs = (blob.x0..=blob.x1).filter(|&x| is_in(x, y));
        if let Some(first) = xs.next() {
            let last = xs.last().unwrap_or(first);
            pts.push([first as f64 - 0.5, y as f64]);
            pts.push([last as f64 + 0.5, y as f64]);
        }
    }
    for x in blob.x0..=blob.x1 {
        let mut ys = (blob.y0..=blob.y1).filter(|&y| is_in(x, y));
        if let Some(first) = ys.next() {
            let last = ys.last().unwrap_or(first);
            pts.push([x as f64, first as f64 - 0.5]);
            pts.push([x as f64, last as f64 + 0.5]);
        }
    }
    pts
}

impl PupilDetector for DarkPupilDetector {
    fn detect(&self, gray: &GrayImage) -> PupilEllipse {
        let threshold = self.dark_threshold(gray);
        let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([if gray.get_pixel(x, y)[0] <= threshold { 255 } else { 0 }])
        });
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let Some(blob) = self.select_blob(&labels) else {
            return PupilEllipse::none();
        };

        let contour = outer_contour(&labels, &blob);
        let Some(fit) = fit_ellipse_ransac(&contour, &self.config.ransac) else {
            return PupilEllipse::none();
        };
        let e = fit.ellipse;
        let inside = e.cx >= blob.x0 as f64
            && e.cx <= blob.x1 as f64
            && e.cy >= blob.y0 as f64
            && e.cy <= blob.y1 as f64;
        if !inside {
            return PupilEllipse::none();
        }
        PupilEllipse {
            center_x: e.cx,
            center_y: e.cy,
            major_axis: 2.0 * e.a,
            minor_axis: 2.0 * e.b,
            angle: e.angle,
            confidence: fit.inlier_ratio().clamp(0.0, 1.0),
        }
    }
}
