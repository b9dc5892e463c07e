//! Calibration-target localization: the centroid of a fixed cluster of markers.
//!
//! The stimulus shows exactly `cluster_size` markers around the fixation
//! point. A frame where a different number is decoded (occlusion, motion blur,
//! target off screen) is reported as not found instead of guessing.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::marker::{DetectedMarker, MarkerDetector, MarkerDetectorConfig};

/// Target position for one scene frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetMeasurement {
    pub frame_index: usize,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub found: bool,
}

impl TargetMeasurement {
    pub fn not_found(frame_index: usize) -> Self {
        Self {
            frame_index,
            centroid_x: f64::NAN,
            centroid_y: f64::NAN,
            found: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Number of markers forming the target.
    pub cluster_size: usize,
    #[serde(flatten)]
    pub detector: MarkerDetectorConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_size: 4,
            detector: MarkerDetectorConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterLocator {
    cluster_size: usize,
    detector: MarkerDetector,
}

impl Default for ClusterLocator {
    fn default() -> Self {
        Self::new(ClusterConfig::default())
    }
}

impl ClusterLocator {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            cluster_size: config.cluster_size,
            detector: MarkerDetector::new(config.detector),
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn locate_markers(&self, gray: &GrayImage) -> Vec<DetectedMarker> {
        self.detector.detect(gray)
    }

    pub fn locate(&self, frame_index: usize, gray: &GrayImage) -> TargetMeasurement {
        let markers = self.locate_markers(gray);
        measurement_from_markers(frame_index, &markers, self.cluster_size)
    }
}

/// Centroid of the per-marker corner means when exactly `cluster_size`
/// markers were decoded.
pub fn measurement_from_markers(
    frame_index: usize,
    markers: &[DetectedMarker],
    cluster_size: usize,
) -> TargetMeasurement {
    if cluster_size == 0 || markers.len() != cluster_size {
        tracing::debug!(
            frame_index,
            decoded = markers.len(),
            expected = cluster_size,
            "target not found"
        );
        return TargetMeasurement::not_found(frame_index);
    }
    let k = markers.len() as f64;
    let (sx, sy) = markers.iter().fold((0.0, 0.0), |(sx, sy), m| {
        let c = m.center();
        (sx + c[0], sy + c[1])
    });
    TargetMeasurement {
        frame_index,
        centroid_x: sx / k,
        centroid_y: sy / k,
        found: true,
    }
}
