//! Binary calibration artifact.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{optimal_new_camera_matrix, CalibrationResult};
use crate::camera::{CameraIntrinsics, CameraModel, RadialTangentialDistortion};
use crate::error::PipelineError;

/// Persisted calibration. Field order is part of the binary format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub camera_matrix: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`.
    pub distortion_coefficients: Vec<f64>,
    pub refined_camera_matrix: [[f64; 3]; 3],
}

impl CalibrationArtifact {
    pub fn from_result(result: &CalibrationResult, alpha: f64) -> Self {
        let refined = optimal_new_camera_matrix(&result.model, result.image_size, alpha);
        Self {
            camera_matrix: result.model.intrinsics.to_matrix(),
            distortion_coefficients: result.model.distortion.coefficients(),
            refined_camera_matrix: refined.to_matrix(),
        }
    }

    pub fn model(&self) -> CameraModel {
        CameraModel {
            intrinsics: CameraIntrinsics::from_matrix(&self.camera_matrix),
            distortion: RadialTangentialDistortion::from_coefficients(&self.distortion_coefficients),
        }
    }

    pub fn refined_intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics::from_matrix(&self.refined_camera_matrix)
    }

    /// Writes `<path>.partial` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = std::path::PathBuf::from(partial);
        let result = (|| -> Result<(), PipelineError> {
            let mut w = BufWriter::new(File::create(&partial)?);
            bincode::serialize_into(&mut w, self)?;
            w.flush()?;
            w.get_ref().sync_all()?;
            std::fs::rename(&partial, path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&partial);
        }
        result
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::input_not_found(path));
        }
        let r = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(r)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_persists_and_reloads() {
        let model = CameraModel {
            intrinsics: CameraIntrinsics {
                fx: 500.0,
                fy: 505.0,
                cx: 320.0,
                cy: 240.0,
            },
            distortion: RadialTangentialDistortion {
                k1: -0.1,
                ..Default::default()
            },
        };
        let result = CalibrationResult {
            model,
            rms_error: 0.2,
            views_used: 5,
            image_size: (640, 480),
        };
        let artifact = CalibrationArtifact::from_result(&result, 1.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.bin");
        artifact.save(&path).unwrap();
        assert!(!dir.path().join("calibration.bin.partial").exists());
        let back = CalibrationArtifact::load(&path).unwrap();
        assert_eq!(back, artifact);
        assert_eq!(back.model(), model);
        assert!(matches!(
            CalibrationArtifact::load(&dir.path().join("missing.bin")),
            Err(PipelineError::InputNotFound { .. })
        ));
    }
}
