//! Per-frame pupil extraction: detrend → median denoise → ellipse detection.

mod detector;

pub use detector::{DarkPupilDetector, PupilDetector, PupilDetectorConfig, PupilEllipse};

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::{FrameOutcome, FrameWarning};
use crate::illumination::{DetrendBasis, DetrendError, TrendCorrection};

/// Pupil estimate for one eye frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PupilMeasurement {
    pub frame_index: usize,
    pub center_x: f64,
    pub center_y: f64,
    pub diameter: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PupilConfig {
    /// Odd median kernel size applied after detrending.
    pub median_kernel: u32,
    pub trend_correction: TrendCorrection,
    #[serde(flatten)]
    pub detector: PupilDetectorConfig,
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self {
            median_kernel: 5,
            trend_correction: TrendCorrection::default(),
            detector: PupilDetectorConfig::default(),
        }
    }
}

/// Everything computed for one frame, kept for QA rendering.
#[derive(Debug, Clone)]
pub struct PupilAnalysis {
    pub measurement: PupilMeasurement,
    pub ellipse: PupilEllipse,
    pub denoised: GrayImage,
}

/// Pupil extractor bound to one frame size.
pub struct PupilExtractor<D = DarkPupilDetector> {
    basis: DetrendBasis,
    config: PupilConfig,
    detector: D,
}

impl PupilExtractor<DarkPupilDetector> {
    pub fn new(width: u32, height: u32, config: PupilConfig) -> Self {
        let detector = DarkPupilDetector::new(config.detector.clone());
        Self::with_detector(width, height, config, detector)
    }
}

impl<D: PupilDetector> PupilExtractor<D> {
    pub fn with_detector(width: u32, height: u32, config: PupilConfig, detector: D) -> Self {
        Self {
            basis: DetrendBasis::new(width, height),
            config,
            detector,
        }
    }

    pub fn measure(
        &self,
        frame_index: usize,
        frame: &DynamicImage,
    ) -> FrameOutcome<PupilMeasurement> {
        self.analyze(frame_index, &frame.to_luma8())
            .map(|a| a.measurement)
    }

    pub fn analyze(&self, frame_index: usize, gray: &GrayImage) -> FrameOutcome<PupilAnalysis> {
        let denoised = crate::illumination::preprocess(
            &self.basis,
            gray,
            self.config.trend_correction,
            self.config.median_kernel,
        )
        .map_err(|e| match e {
            DetrendError::DimensionMismatch { expected, got } => FrameWarning::DimensionMismatch {
                index: frame_index,
                expected,
                got,
            },
            other => FrameWarning::Processing {
                index: frame_index,
                reason: other.to_string(),
            },
        })?;

        let ellipse = self.detector.detect(&denoised);
        let measurement = PupilMeasurement {
            frame_index,
            center_x: ellipse.center_x,
            center_y: ellipse.center_y,
            diameter: ellipse.diameter(),
            confidence: ellipse.confidence,
        };
        Ok(PupilAnalysis {
            measurement,
            ellipse,
            denoised,
        })
    }
}

/// Thresholds marking a pupil sample as a blink or otherwise invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlinkFilter {
    /// Samples with a smaller diameter (pixels) are excluded. Unset disables the check.
    pub min_diameter: Option<f64>,
    /// Samples with a lower detector confidence are excluded.
    pub min_confidence: f64,
}

impl Default for BlinkFilter {
    fn default() -> Self {
        Self {
            min_diameter: None,
            min_confidence: 0.9,
        }
    }
}

impl BlinkFilter {
    pub fn is_blink(&self, x: f64, y: f64, diameter: f64, confidence: f64) -> bool {
        if !(x.is_finite() && y.is_finite() && confidence.is_finite()) {
            return true;
        }
        if confidence < self.min_confidence {
            return true;
        }
        match self.min_diameter {
            Some(min) => !(diameter >= min),
            None => false,
        }
    }

    /// Pupil centers with blink samples replaced by NaN.
    pub fn mask(&self, rows: &[crate::io::PupilRow]) -> Vec<[f64; 2]> {
        rows.iter()
            .map(|r| {
                if self.is_blink(r.x, r.y, r.diameter, r.confidence) {
                    [f64::NAN, f64::NAN]
                } else {
                    [r.x, r.y]
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_eye_frame, EyeScene};
    use approx::assert_relative_eq;

    #[test]
    fn extractor_measures_pupil_under_gradient() {
        let scene = EyeScene {
            pupil_center: [70.0, 80.0],
            gradient: [0.3, -0.2],
            ..EyeScene::default()
        };
        let frame = DynamicImage::ImageLuma8(draw_eye_frame(&scene));
        let ex = PupilExtractor::new(scene.width, scene.height, PupilConfig::default());
        let m = ex.measure(7, &frame).unwrap();
        assert_eq!(m.frame_index, 7);
        assert_relative_eq!(m.center_x, 70.0, epsilon = 1.0);
        assert_relative_eq!(m.center_y, 80.0, epsilon = 1.0);
        assert!(m.confidence > 0.8, "confidence {}", m.confidence);
    }

    #[test]
    fn wrong_frame_size_is_a_warning() {
        let ex = PupilExtractor::new(64, 48, PupilConfig::default());
        let frame = DynamicImage::ImageLuma8(GrayImage::new(32, 48));
        let err = ex.measure(3, &frame).unwrap_err();
        assert!(matches!(err, FrameWarning::DimensionMismatch { index: 3, .. }));
    }

    #[test]
    fn custom_detector_is_used() {
        struct Fixed;
        impl PupilDetector for Fixed {
            fn detect(&self, _gray: &GrayImage) -> PupilEllipse {
                PupilEllipse {
                    center_x: 1.0,
                    center_y: 2.0,
                    major_axis: 30.0,
                    minor_axis: 20.0,
                    angle: 0.0,
                    confidence: 0.5,
                }
            }
        }
        let ex = PupilExtractor::with_detector(16, 16, PupilConfig::default(), Fixed);
        let m = ex
            .measure(0, &DynamicImage::ImageLuma8(GrayImage::new(16, 16)))
            .unwrap();
        assert_eq!((m.center_x, m.center_y, m.diameter), (1.0, 2.0, 30.0));
    }

    #[test]
    fn blink_filter_thresholds() {
        let f = BlinkFilter {
            min_diameter: Some(20.0),
            min_confidence: 0.9,
        };
        assert!(!f.is_blink(10.0, 10.0, 30.0, 0.95));
        assert!(f.is_blink(10.0, 10.0, 30.0, 0.5));
        assert!(f.is_blink(10.0, 10.0, 10.0, 0.95));
        assert!(f.is_blink(f64::NAN, 10.0, 30.0, 0.95));
        assert!(!BlinkFilter::default().is_blink(1.0, 1.0, 0.0, 0.95));
    }
}
