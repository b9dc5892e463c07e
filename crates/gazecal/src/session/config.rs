//! Session configuration, loaded from JSON.
//!
//! Every section has defaults, so a minimal file only names the data
//! directory and the recording stamp:
//!
//! ```json
//! { "dataPath": "/data/subject01", "session": "2023_05_11_1423" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationConfig;
use crate::cluster::ClusterConfig;
use crate::error::{ConfigError, PipelineError};
use crate::pupil::{BlinkFilter, PupilConfig};
use crate::regression::RansacRegressionConfig;
use crate::trigger::SegmenterConfig;

/// Per-camera overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    /// Nominal frame rate; when set, frame times are regenerated from frame
    /// indices instead of read from the trigger table.
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlignmentConfig {
    pub grid_step_ms: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self { grid_step_ms: 1.0 }
    }
}

/// Optional diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    /// Log every frame's measurement at info level.
    pub display_results: bool,
    /// Dump preprocessed eye and scene frames.
    pub make_processed_video: bool,
    /// Dump eye frames with the fitted pupil ellipse.
    pub make_pupil_video: bool,
    /// Dump scene frames with decoded markers and with the predicted gaze, and
    /// undistorted calibration frames.
    pub make_video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub data_path: Option<PathBuf>,
    /// Recording stamp shared by the file names of one session.
    pub session: Option<String>,
    pub eye: StreamConfig,
    pub scene: StreamConfig,
    pub pupil: PupilConfig,
    pub blink: BlinkFilter,
    pub markers: ClusterConfig,
    pub board: CalibrationConfig,
    pub segmentation: SegmenterConfig,
    /// Epoch (0-based) holding the fixation-target task.
    pub calibration_epoch: usize,
    /// Epoch (0-based) holding the board sweep, used without a calibration recording.
    pub board_epoch: usize,
    pub alignment: AlignmentConfig,
    pub regression: RansacRegressionConfig,
    pub output: OutputConfig,
    /// Recompute stages whose outputs already exist.
    pub force_reprocess: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            session: None,
            eye: StreamConfig::default(),
            scene: StreamConfig::default(),
            pupil: PupilConfig::default(),
            blink: BlinkFilter::default(),
            markers: ClusterConfig::default(),
            board: CalibrationConfig::default(),
            segmentation: SegmenterConfig::default(),
            calibration_epoch: 1,
            board_epoch: 0,
            alignment: AlignmentConfig::default(),
            regression: RansacRegressionConfig::default(),
            output: OutputConfig::default(),
            force_reprocess: false,
        }
    }
}

fn check(ok: bool, field: &'static str, reason: &str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::new(field, reason))
    }
}

fn check_rate(rate: Option<f64>, field: &'static str) -> Result<(), ConfigError> {
    match rate {
        Some(r) => check(r.is_finite() && r > 0.0, field, "must be a positive frame rate"),
        None => Ok(()),
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::input_not_found(path));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn data_path(&self) -> Result<&Path, ConfigError> {
        self.data_path
            .as_deref()
            .ok_or_else(|| ConfigError::new("dataPath", "required"))
    }

    pub fn session(&self) -> Result<&str, ConfigError> {
        match self.session.as_deref() {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ConfigError::new("session", "required")),
        }
    }

    /// Reject absent or malformed options before any file is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.data_path()?;
        self.session()?;
        check_rate(self.eye.frame_rate, "eye.frameRate")?;
        check_rate(self.scene.frame_rate, "scene.frameRate")?;

        let k = self.pupil.median_kernel;
        check(k % 2 == 1, "pupil.medianKernel", "must be odd")?;
        let d = &self.pupil.detector;
        check(
            d.pupil_size_min > 0.0 && d.pupil_size_min <= d.pupil_size_max,
            "pupil.pupilSizeMin",
            "must be positive and not exceed pupilSizeMax",
        )?;
        check(
            (0.0..1.0).contains(&d.dark_percentile),
            "pupil.darkPercentile",
            "must lie in [0, 1)",
        )?;
        check(d.max_aspect >= 1.0, "pupil.maxAspect", "must be at least 1")?;

        check(
            (0.0..=1.0).contains(&self.blink.min_confidence),
            "blink.minConfidence",
            "must lie in [0, 1]",
        )?;
        if let Some(min) = self.blink.min_diameter {
            check(min.is_finite() && min >= 0.0, "blink.minDiameter", "must be non-negative")?;
        }

        check(self.markers.cluster_size > 0, "markers.clusterSize", "must be positive")?;
        check(
            self.markers.detector.min_side_px > 0.0,
            "markers.minSidePx",
            "must be positive",
        )?;

        let b = &self.board.board;
        check(
            b.grid_size_width > 0 && b.grid_size_height > 0,
            "board.gridSize",
            "must be positive",
        )?;
        check(b.box_width_pix > 0.0, "board.boxWidthPix", "must be positive")?;
        check(
            b.marker_ratio > 0.0 && b.marker_ratio < 1.0,
            "board.markerRatio",
            "must lie in (0, 1)",
        )?;
        check(b.fits_dictionary(), "board", "more markers than dictionary codes")?;
        check(
            (0.0..=1.0).contains(&self.board.alpha),
            "board.alpha",
            "must lie in [0, 1]",
        )?;

        check(
            self.segmentation.rising_threshold > 0.0
                && self.segmentation.falling_threshold < 0.0,
            "segmentation",
            "rising threshold must be positive and falling threshold negative",
        )?;
        check(
            self.alignment.grid_step_ms.is_finite() && self.alignment.grid_step_ms > 0.0,
            "alignment.gridStepMs",
            "must be positive",
        )?;

        let r = &self.regression;
        check(r.max_trials > 0, "regression.maxTrials", "must be positive")?;
        check(
            r.stop_probability > 0.0 && r.stop_probability <= 1.0,
            "regression.stopProbability",
            "must lie in (0, 1]",
        )?;
        if let Some(t) = r.residual_threshold {
            check(t.is_finite() && t > 0.0, "regression.residualThreshold", "must be positive")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SessionConfig {
        serde_json::from_str(r#"{"dataPath": "/tmp/x", "session": "s1"}"#).unwrap()
    }

    #[test]
    fn minimal_json_gets_documented_defaults() {
        let c = minimal();
        assert!(c.validate().is_ok());
        assert_eq!(c.calibration_epoch, 1);
        assert_eq!(c.board_epoch, 0);
        assert_eq!(c.pupil.detector.pupil_size_min, 25.0);
        assert_eq!(c.board.board.grid_size_width, 7);
        assert_eq!(c.board.board.grid_size_height, 5);
        assert_eq!(c.board.corner_threshold, 4);
        assert_eq!(c.markers.cluster_size, 4);
        assert_eq!(c.alignment.grid_step_ms, 1.0);
        assert!(c.eye.frame_rate.is_none());
    }

    #[test]
    fn camel_case_sections_parse() {
        let c: SessionConfig = serde_json::from_str(
            r#"{
                "dataPath": "/d", "session": "s",
                "eye": {"frameRate": 90}, "scene": {"frameRate": 30},
                "pupil": {"pupilSizeMin": 20, "medianKernel": 3},
                "board": {"gridSizeWidth": 8, "cornerThreshold": 6},
                "markers": {"clusterSize": 3},
                "output": {"makePupilVideo": true},
                "forceReprocess": true
            }"#,
        )
        .unwrap();
        assert_eq!(c.eye.frame_rate, Some(90.0));
        assert_eq!(c.pupil.detector.pupil_size_min, 20.0);
        assert_eq!(c.pupil.median_kernel, 3);
        assert_eq!(c.board.board.grid_size_width, 8);
        assert_eq!(c.board.corner_threshold, 6);
        assert_eq!(c.markers.cluster_size, 3);
        assert!(c.output.make_pupil_video && c.force_reprocess);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validation_names_the_bad_option() {
        let missing = SessionConfig::default().validate().unwrap_err();
        assert_eq!(missing.field, "dataPath");

        let mut c = minimal();
        c.session = Some("  ".into());
        assert_eq!(c.validate().unwrap_err().field, "session");

        let mut c = minimal();
        c.pupil.median_kernel = 4;
        assert_eq!(c.validate().unwrap_err().field, "pupil.medianKernel");

        let mut c = minimal();
        c.scene.frame_rate = Some(0.0);
        assert_eq!(c.validate().unwrap_err().field, "scene.frameRate");

        let mut c = minimal();
        c.markers.cluster_size = 0;
        assert_eq!(c.validate().unwrap_err().field, "markers.clusterSize");

        let mut c = minimal();
        c.blink.min_confidence = 1.5;
        assert_eq!(c.validate().unwrap_err().field, "blink.minConfidence");

        let mut c = minimal();
        c.board.board.grid_size_width = 20;
        assert_eq!(c.validate().unwrap_err().field, "board");

        let mut c = minimal();
        c.alignment.grid_step_ms = 0.0;
        assert_eq!(c.validate().unwrap_err().field, "alignment.gridStepMs");
    }
}
