//! Scene-camera calibration from views of the marker board.
//!
//! Views are accepted per frame, then intrinsics and distortion are estimated
//! jointly: Zhang's closed form on the current ideal corners, a linear
//! distortion fit on the raw corners, undistortion of the raw corners, and
//! repeat.

mod artifact;
mod board;
mod rectify;
mod zhang;

pub use artifact::CalibrationArtifact;
pub use board::{BoardObservation, BoardSpec};
pub use rectify::{optimal_new_camera_matrix, undistort_image};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::{CameraModel, RadialTangentialDistortion};
use crate::homography::{Homography, HomographyError};
use zhang::{fit_distortion, intrinsics_from_homographies, ViewGeometry};

/// Views needed for a closed-form estimate.
pub const MIN_VIEWS: usize = 3;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("need at least {needed} accepted board views, found {found}")]
    TooFewViews { needed: usize, found: usize },
    #[error("board view at frame {frame_index}: {source}")]
    View {
        frame_index: usize,
        #[source]
        source: HomographyError,
    },
    #[error("degenerate calibration geometry: {0}")]
    Degenerate(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalibrationConfig {
    #[serde(flatten)]
    pub board: BoardSpec,
    /// A view is used when it has more corners than this.
    pub corner_threshold: usize,
    /// Estimate lens distortion; otherwise a pure pinhole model is fitted.
    pub fit_distortion: bool,
    /// Intrinsics/distortion alternations.
    pub refine_iterations: usize,
    /// Free scaling for the refined camera matrix, 0 (valid pixels only) to 1 (all pixels).
    pub alpha: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board: BoardSpec::default(),
            corner_threshold: 4,
            fit_distortion: true,
            refine_iterations: 3,
            alpha: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub model: CameraModel,
    /// RMS reprojection error over all used corners, pixels.
    pub rms_error: f64,
    pub views_used: usize,
    pub image_size: (u32, u32),
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationEstimator {
    config: CalibrationConfig,
}

impl CalibrationEstimator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn accept(&self, observation: &BoardObservation) -> bool {
        observation.corner_count() > self.config.corner_threshold
    }

    pub fn calibrate(
        &self,
        observations: &[BoardObservation],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult, CalibrationError> {
        let views: Vec<&BoardObservation> =
            observations.iter().filter(|o| self.accept(o)).collect();
        if views.len() < MIN_VIEWS {
            return Err(CalibrationError::TooFewViews {
                needed: MIN_VIEWS,
                found: views.len(),
            });
        }

        let passes = if self.config.fit_distortion {
            self.config.refine_iterations.max(1)
        } else {
            1
        };
        let mut ideal: Vec<Vec<[f64; 2]>> = views.iter().map(|v| v.image_points.clone()).collect();
        let mut model = None;
        let mut homographies = Vec::new();
        for pass in 0..passes {
            homographies = view_homographies(&views, &ideal)?;
            let intrinsics = intrinsics_from_homographies(&homographies, image_size)?;
            let distortion = if self.config.fit_distortion {
                let geometry: Vec<ViewGeometry<'_>> = views
                    .iter()
                    .zip(&homographies)
                    .map(|(v, h)| ViewGeometry {
                        homography: *h,
                        object: &v.object_points,
                        image: &v.image_points,
                    })
                    .collect();
                fit_distortion(intrinsics, &geometry)?
            } else {
                RadialTangentialDistortion::default()
            };
            let m = CameraModel {
                intrinsics,
                distortion,
            };
            tracing::debug!(
                pass,
                fx = intrinsics.fx,
                fy = intrinsics.fy,
                k1 = distortion.k1,
                "calibration pass"
            );
            ideal = views
                .iter()
                .map(|v| {
                    v.image_points
                        .iter()
                        .map(|p| m.undistort_pixel(*p).unwrap_or(*p))
                        .collect()
                })
                .collect();
            model = Some(m);
        }
        let model = model.ok_or(CalibrationError::Degenerate("no calibration pass ran"))?;
        if self.config.fit_distortion {
            homographies = view_homographies(&views, &ideal)?;
        }

        let mut sum = 0.0;
        let mut count = 0usize;
        for (v, h) in views.iter().zip(&homographies) {
            let h = Homography(*h);
            for (o, p) in v.object_points.iter().zip(&v.image_points) {
                if let Some(q) = model.distort_pixel(h.project(*o)) {
                    sum += (q[0] - p[0]).powi(2) + (q[1] - p[1]).powi(2);
                    count += 1;
                }
            }
        }
        let rms_error = if count > 0 {
            (sum / count as f64).sqrt()
        } else {
            f64::NAN
        };
        tracing::info!(views = views.len(), rms_error, "camera calibrated");
        Ok(CalibrationResult {
            model,
            rms_error,
            views_used: views.len(),
            image_size,
        })
    }
}

fn view_homographies(
    views: &[&BoardObservation],
    points: &[Vec<[f64; 2]>],
) -> Result<Vec<nalgebra::Matrix3<f64>>, CalibrationError> {
    views
        .iter()
        .zip(points)
        .map(|(v, pts)| {
            Homography::fit(&v.object_points, pts)
                .map(|h| h.0)
                .map_err(|source| CalibrationError::View {
                    frame_index: v.frame_index,
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::MarkerDetector;
    use crate::test_utils::{board_pose, render_board_view, VIEW_SIZE as SIZE};
    use nalgebra::Rotation3;

    fn small_board() -> BoardSpec {
        BoardSpec {
            grid_size_width: 6,
            grid_size_height: 4,
            box_width_pix: 100.0,
            marker_ratio: 0.75,
        }
    }

    #[test]
    fn accept_requires_more_corners_than_threshold() {
        let est = CalibrationEstimator::default();
        let mut obs = BoardObservation {
            frame_index: 0,
            marker_ids: vec![0],
            object_points: vec![[0.0, 0.0]; 4],
            image_points: vec![[0.0, 0.0]; 4],
        };
        assert!(!est.accept(&obs));
        obs.object_points.extend([[1.0, 1.0]; 4]);
        obs.image_points.extend([[1.0, 1.0]; 4]);
        assert!(est.accept(&obs));
    }

    #[test]
    fn too_few_views_is_an_error() {
        let err = CalibrationEstimator::default()
            .calibrate(&[], SIZE)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::TooFewViews { needed: 3, found: 0 }));
    }

    #[test]
    fn calibrates_from_exact_correspondences() {
        let board = BoardSpec::default();
        let poses = [
            Rotation3::from_euler_angles(0.35, 0.1, 0.0),
            Rotation3::from_euler_angles(-0.3, 0.25, 0.1),
            Rotation3::from_euler_angles(0.1, -0.35, -0.05),
            Rotation3::from_euler_angles(-0.2, -0.2, 0.2),
        ];
        let observations: Vec<BoardObservation> = poses
            .iter()
            .enumerate()
            .map(|(i, rot)| {
                let h = board_pose(&board, *rot, 2600.0);
                let mut obs = BoardObservation {
                    frame_index: i,
                    marker_ids: Vec::new(),
                    object_points: Vec::new(),
                    image_points: Vec::new(),
                };
                for id in 0..board.marker_count() {
                    let obj = board.object_corners(id).unwrap();
                    obs.marker_ids.push(id);
                    obs.object_points.extend_from_slice(&obj);
                    obs.image_points.extend(obj.iter().map(|p| h.project(*p)));
                }
                obs
            })
            .collect();
        let result = CalibrationEstimator::default()
            .calibrate(&observations, SIZE)
            .unwrap();
        let k = result.model.intrinsics;
        assert!((k.fx - 560.0).abs() < 1.0, "fx {}", k.fx);
        assert!((k.cy - 236.0).abs() < 1.0, "cy {}", k.cy);
        assert!(result.model.distortion.k1.abs() < 1e-6);
        assert!(result.rms_error < 1e-4, "rms {}", result.rms_error);
        assert_eq!(result.views_used, 4);
    }

    #[test]
    fn calibrates_from_rendered_board_views() {
        let board = small_board();
        let detector = MarkerDetector::default();
        let poses = [
            Rotation3::from_euler_angles(0.4, 0.1, 0.05),
            Rotation3::from_euler_angles(-0.35, 0.3, -0.1),
            Rotation3::from_euler_angles(0.15, -0.4, 0.0),
            Rotation3::from_euler_angles(-0.25, -0.25, 0.15),
            Rotation3::from_euler_angles(0.3, 0.35, -0.2),
        ];
        let estimator = CalibrationEstimator::new(CalibrationConfig {
            board,
            fit_distortion: false,
            ..CalibrationConfig::default()
        });
        let observations: Vec<BoardObservation> = poses
            .iter()
            .enumerate()
            .map(|(i, rot)| {
                let img = render_board_view(&board, &board_pose(&board, *rot, 1100.0));
                BoardObservation::from_markers(i, &detector.detect(&img), &board)
            })
            .collect();
        for obs in &observations {
            assert!(estimator.accept(obs), "view {} has {} corners", obs.frame_index, obs.corner_count());
        }
        let result = estimator.calibrate(&observations, SIZE).unwrap();
        let k = result.model.intrinsics;
        assert!((k.fx - 560.0).abs() < 0.05 * 560.0, "fx {}", k.fx);
        assert!((k.fy - 560.0).abs() < 0.05 * 560.0, "fy {}", k.fy);
        assert!(result.rms_error < 1.0, "rms {}", result.rms_error);
    }
}
