//! gazecal: offline calibration of a head-mounted eye tracker.
//!
//! An eye camera and a scene camera record the same session and share a
//! digital trigger line. The pipeline stages are:
//!
//! 1. **Trigger** – segment the trigger trace of each stream into epochs.
//! 2. **Pupil** – illumination correction, denoising and robust ellipse fit
//!    of the dark pupil in every eye frame.
//! 3. **Cluster** – locate the fiducial marker cluster shown as the gaze
//!    target in every scene frame of the calibration epoch.
//! 4. **Calibration** – scene-camera intrinsics and lens distortion from
//!    views of a marker board.
//! 5. **Align** – resample both traces onto a common time grid.
//! 6. **Regression** – robust linear map from pupil position to scene
//!    coordinates, one independent fit per axis.
//!
//! [`session::Session`] runs the stages against a recording directory and
//! persists each result so reruns skip finished work.

pub mod align;
pub mod calibration;
pub mod camera;
pub mod cluster;
pub mod conic;
pub mod error;
pub mod homography;
pub mod illumination;
pub mod io;
pub mod marker;
pub mod pupil;
pub mod regression;
pub mod session;
pub mod trigger;

#[cfg(test)]
pub(crate) mod test_utils;

pub use align::{align, AlignedSample, TimeSeries};
pub use calibration::{CalibrationArtifact, CalibrationConfig, CalibrationEstimator};
pub use camera::{CameraIntrinsics, CameraModel, RadialTangentialDistortion};
pub use cluster::{ClusterConfig, ClusterLocator, TargetMeasurement};
pub use error::{FrameOutcome, FrameWarning, PipelineError};
pub use marker::{DetectedMarker, MarkerDetector, MarkerDetectorConfig};
pub use pupil::{BlinkFilter, PupilConfig, PupilExtractor, PupilMeasurement};
pub use regression::{GazeModel, RansacRegressionConfig};
pub use session::{Session, SessionConfig, Stage, StageReport, StageStatus};
pub use trigger::{Epoch, FrameTimestamp, Segmenter, SegmenterConfig};
