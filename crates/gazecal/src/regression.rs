//! Robust linear mapping from pupil position to scene-camera gaze position.
//!
//! Each gaze axis is an independent affine function of the pupil center,
//! fitted by RANSAC consensus and refitted by least squares on the consensus
//! set. The sampling sequence is seeded, so a fit is reproducible.

use std::path::Path;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::align::AlignedSample;
use crate::conic::sample_indices;
use crate::error::{InsufficientDataError, PipelineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RansacRegressionConfig {
    pub max_trials: usize,
    /// Rows per consensus sample; unset uses one more than the parameter count.
    pub min_samples: Option<usize>,
    /// Inlier residual bound; unset uses the median absolute deviation of the
    /// targets, or a robust scale of least-squares residuals when that is zero.
    pub residual_threshold: Option<f64>,
    /// Confidence at which sampling stops early.
    pub stop_probability: f64,
    /// Fewer complete rows than this is an error.
    pub min_valid_samples: usize,
    pub seed: u64,
}

impl Default for RansacRegressionConfig {
    fn default() -> Self {
        Self {
            max_trials: 100,
            min_samples: None,
            residual_threshold: None,
            stop_probability: 0.99,
            min_valid_samples: 10,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RobustFit {
    pub coefficients: Vec<f64>,
    pub inlier_mask: Vec<bool>,
    pub n_inliers: usize,
    pub trials: usize,
    pub residual_threshold: f64,
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Median absolute deviation from the median.
pub fn median_absolute_deviation(values: &[f64]) -> f64 {
    let mut v = values.to_vec();
    let m = median(&mut v);
    let mut dev: Vec<f64> = values.iter().map(|x| (x - m).abs()).collect();
    median(&mut dev)
}

/// Smallest scale treated as nonzero.
const MIN_SCALE: f64 = 1e-9;

/// 2.5 standard deviations of a normal, expressed through the median absolute residual.
const RESIDUAL_SCALE: f64 = 2.5 * 1.4826;

fn value_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let (lo, hi) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo.is_finite() {
        hi - lo
    } else {
        0.0
    }
}

/// Inlier bound when none is configured.
///
/// Targets held on a few fixation points make the target MAD zero as soon as
/// one point covers half the rows; the scale then comes from the residuals of
/// an ordinary least-squares fit over every row.
fn default_threshold(x: &DMatrix<f64>, y: &DVector<f64>) -> f64 {
    let mad = median_absolute_deviation(y.as_slice());
    if mad > MIN_SCALE {
        return mad;
    }
    let scale = least_squares(x, y).map_or(0.0, |beta| {
        let mut residuals: Vec<f64> = (x * beta - y).abs().iter().copied().collect();
        RESIDUAL_SCALE * median(&mut residuals)
    });
    tracing::debug!(scale, "target MAD is zero, using residual scale");
    scale.max(MIN_SCALE)
}

fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    if svd.rank(1e-10 * svd.singular_values.max().max(1.0)) < x.ncols() {
        return None;
    }
    svd.solve(y, 1e-12).ok()
}

/// Trials needed to draw an all-inlier sample with `probability`.
fn required_trials(n_inliers: usize, n: usize, min_samples: usize, probability: f64) -> usize {
    let ratio = n_inliers as f64 / n as f64;
    let p_good = ratio.powi(min_samples as i32);
    if p_good >= 1.0 {
        return 1;
    }
    if p_good <= 0.0 {
        return usize::MAX;
    }
    let trials = (1.0 - probability).ln() / (1.0 - p_good).ln();
    if trials.is_finite() {
        trials.ceil().max(1.0) as usize
    } else {
        usize::MAX
    }
}

/// RANSAC linear regression of `targets` on the rows of `design`.
///
/// Candidates are ranked by inlier count, then by lower inlier residual sum.
/// A candidate whose inliers all share one target value is rejected unless
/// every target does: such a consensus is a constant map through a single
/// fixation, not a fit.
pub fn fit_ransac_linear(
    design: &DMatrix<f64>,
    targets: &[f64],
    config: &RansacRegressionConfig,
) -> Result<RobustFit, InsufficientDataError> {
    let n = design.nrows().min(targets.len());
    let p = design.ncols();
    let min_samples = config.min_samples.unwrap_or(p + 1).max(p);
    let needed = min_samples.max(config.min_valid_samples);
    if n < needed || p == 0 {
        return Err(InsufficientDataError { needed, found: n });
    }
    let y = DVector::from_column_slice(&targets[..n]);
    let x = design.rows(0, n).into_owned();
    let threshold = config
        .residual_threshold
        .unwrap_or_else(|| default_threshold(&x, &y))
        .max(MIN_SCALE);
    let target_range = value_range(y.iter());

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(usize, f64, Vec<bool>)> = None;
    let mut limit = config.max_trials;
    let mut trials = 0;
    while trials < limit {
        trials += 1;
        let idx = sample_indices(&mut rng, n, min_samples);
        let xs = x.select_rows(idx.iter());
        let ys = DVector::from_iterator(idx.len(), idx.iter().map(|&i| y[i]));
        let Some(beta) = least_squares(&xs, &ys) else {
            continue;
        };
        let residuals = (&x * &beta - &y).abs();
        let mask: Vec<bool> = residuals.iter().map(|&r| r <= threshold).collect();
        let count = mask.iter().filter(|&&m| m).count();
        let inlier_range = value_range(y.iter().zip(&mask).filter(|(_, &m)| m).map(|(v, _)| v));
        if target_range > MIN_SCALE && inlier_range <= MIN_SCALE {
            continue;
        }
        let score: f64 = residuals.iter().zip(&mask).filter(|(_, &m)| m).map(|(r, _)| r).sum();
        let better = match &best {
            None => count > 0,
            Some((c, s, _)) => count > *c || (count == *c && score < *s),
        };
        if better {
            best = Some((count, score, mask));
            limit = limit.min(required_trials(count, n, min_samples, config.stop_probability));
        }
    }

    let Some((n_inliers, _, inlier_mask)) = best else {
        return Err(InsufficientDataError {
            needed: min_samples,
            found: 0,
        });
    };
    let keep: Vec<usize> = (0..n).filter(|&i| inlier_mask[i]).collect();
    let xs = x.select_rows(keep.iter());
    let ys = DVector::from_iterator(keep.len(), keep.iter().map(|&i| y[i]));
    let beta = least_squares(&xs, &ys).ok_or(InsufficientDataError {
        needed: p,
        found: n_inliers,
    })?;
    tracing::debug!(trials, n_inliers, n, threshold, "ransac regression");
    Ok(RobustFit {
        coefficients: beta.iter().copied().collect(),
        inlier_mask,
        n_inliers,
        trials,
        residual_threshold: threshold,
    })
}

/// Affine map for one gaze axis: `bias + wx · pupil_x + wy · pupil_y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisModel {
    /// `[bias, wx, wy]`.
    pub coefficients: [f64; 3],
    pub n_samples: usize,
    pub n_inliers: usize,
}

impl AxisModel {
    fn from_fit(fit: &RobustFit, n_samples: usize) -> Self {
        let c = &fit.coefficients;
        Self {
            coefficients: [c[0], c[1], c[2]],
            n_samples,
            n_inliers: fit.n_inliers,
        }
    }

    pub fn predict(&self, pupil_x: f64, pupil_y: f64) -> f64 {
        let [b, wx, wy] = self.coefficients;
        b + wx * pupil_x + wy * pupil_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeModel {
    pub x: AxisModel,
    pub y: AxisModel,
}

impl GazeModel {
    /// Fit both axes on the complete aligned samples.
    pub fn fit(
        samples: &[AlignedSample],
        config: &RansacRegressionConfig,
    ) -> Result<Self, InsufficientDataError> {
        let valid: Vec<&AlignedSample> = samples.iter().filter(|s| s.is_complete()).collect();
        if valid.len() < config.min_valid_samples {
            return Err(InsufficientDataError {
                needed: config.min_valid_samples,
                found: valid.len(),
            });
        }
        let design = DMatrix::from_fn(valid.len(), 3, |r, c| match c {
            0 => 1.0,
            1 => valid[r].pupil_x,
            _ => valid[r].pupil_y,
        });
        let tx: Vec<f64> = valid.iter().map(|s| s.target_x).collect();
        let ty: Vec<f64> = valid.iter().map(|s| s.target_y).collect();
        let fx = fit_ransac_linear(&design, &tx, config)?;
        let fy = fit_ransac_linear(&design, &ty, config)?;
        let model = Self {
            x: AxisModel::from_fit(&fx, valid.len()),
            y: AxisModel::from_fit(&fy, valid.len()),
        };
        tracing::info!(
            samples = valid.len(),
            inliers_x = fx.n_inliers,
            inliers_y = fy.n_inliers,
            "gaze model fitted"
        );
        Ok(model)
    }

    /// Gaze position in scene-camera pixels. NaN input yields NaN output.
    pub fn predict(&self, pupil_x: f64, pupil_y: f64) -> (f64, f64) {
        if !(pupil_x.is_finite() && pupil_y.is_finite()) {
            return (f64::NAN, f64::NAN);
        }
        (self.x.predict(pupil_x, pupil_y), self.y.predict(pupil_x, pupil_y))
    }

    pub fn predict_series(&self, pupil: &[[f64; 2]]) -> Vec<(f64, f64)> {
        pupil.iter().map(|p| self.predict(p[0], p[1])).collect()
    }

    pub fn save_json(&self, path: &Path) -> Result<(), PipelineError> {
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::input_not_found(path));
        }
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }
}
