//! RANSAC around the direct ellipse fit.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::fit::fit_conic;
use super::{sampson_distance, Ellipse};

const MIN_SAMPLE: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EllipseRansacConfig {
    pub max_iters: usize,
    /// Sampson distance in pixels below which a point is an inlier.
    pub inlier_threshold: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for EllipseRansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 300,
            inlier_threshold: 1.0,
            min_inliers: 12,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EllipseRansacResult {
    pub ellipse: Ellipse,
    pub inlier_mask: Vec<bool>,
    pub num_inliers: usize,
}

impl EllipseRansacResult {
    pub fn inlier_ratio(&self) -> f64 {
        if self.inlier_mask.is_empty() {
            0.0
        } else {
            self.num_inliers as f64 / self.inlier_mask.len() as f64
        }
    }
}

/// Robust ellipse fit: best 6-point model by inlier count, refit on its inliers.
///
/// Stops early once more than 90% of the points agree.
pub fn fit_ellipse_ransac(
    points: &[[f64; 2]],
    config: &EllipseRansacConfig,
) -> Option<EllipseRansacResult> {
    let n = points.len();
    if n < MIN_SAMPLE {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(usize, Vec<bool>)> = None;
    let mut sample = vec![[0.0; 2]; MIN_SAMPLE];

    for _ in 0..config.max_iters {
        for (slot, idx) in sample.iter_mut().zip(sample_indices(&mut rng, n, MIN_SAMPLE)) {
            *slot = points[idx];
        }
        let Some(conic) = fit_conic(&sample) else {
            continue;
        };
        if conic.to_ellipse().is_none() {
            continue;
        }
        let mask = inliers(points, |x, y| sampson_distance(&conic, x, y), config.inlier_threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().map_or(true, |(c, _)| count > *c) {
            let done = count * 10 > n * 9;
            best = Some((count, mask));
            if done {
                break;
            }
        }
    }

    let (count, mask) = best?;
    if count < config.min_inliers.max(MIN_SAMPLE) {
        return None;
    }
    let support: Vec<[f64; 2]> = points
        .iter()
        .zip(&mask)
        .filter(|(_, &m)| m)
        .map(|(p, _)| *p)
        .collect();
    let ellipse = fit_conic(&support)?.to_ellipse()?;
    let inlier_mask = inliers(
        points,
        |x, y| ellipse.sampson_distance(x, y),
        config.inlier_threshold,
    );
    let num_inliers = inlier_mask.iter().filter(|&&m| m).count();
    Some(EllipseRansacResult {
        ellipse,
        inlier_mask,
        num_inliers,
    })
}

fn inliers(points: &[[f64; 2]], dist: impl Fn(f64, f64) -> f64, threshold: f64) -> Vec<bool> {
    points.iter().map(|&[x, y]| dist(x, y) < threshold).collect()
}

/// `k` distinct indices from `0..n` via a partial Fisher–Yates shuffle.
pub(crate) fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut idx: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        idx.swap(i, j);
    }
    idx.truncate(k);
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pupil() -> Ellipse {
        Ellipse {
            cx: 80.0,
            cy: 60.0,
            a: 22.0,
            b: 15.0,
            angle: 0.25,
        }
    }

    #[test]
    fn clean_contour_is_all_inliers() {
        let e = pupil();
        let pts = e.sample_points(90);
        let r = fit_ellipse_ransac(&pts, &EllipseRansacConfig::default()).unwrap();
        assert_eq!(r.num_inliers, 90);
        assert_relative_eq!(r.inlier_ratio(), 1.0);
        assert_relative_eq!(r.ellipse.cx, e.cx, epsilon = 1e-6);
        assert_relative_eq!(r.ellipse.cy, e.cy, epsilon = 1e-6);
    }

    #[test]
    fn glint_outliers_are_rejected() {
        let e = pupil();
        let mut pts = e.sample_points(100);
        let mut rng = StdRng::seed_from_u64(17);
        // A corneal reflection punches a small cluster of bogus edge points.
        for _ in 0..25 {
            pts.push([rng.gen_range(85.0..92.0), rng.gen_range(55.0..62.0)]);
        }
        let config = EllipseRansacConfig {
            max_iters: 500,
            ..Default::default()
        };
        let r = fit_ellipse_ransac(&pts, &config).unwrap();
        assert_relative_eq!(r.ellipse.cx, e.cx, epsilon = 0.5);
        assert_relative_eq!(r.ellipse.cy, e.cy, epsilon = 0.5);
        assert_relative_eq!(r.ellipse.a, e.a, epsilon = 0.5);
        assert!(r.num_inliers >= 95, "inliers {}", r.num_inliers);
        assert!(r.num_inliers <= 105, "inliers {}", r.num_inliers);
    }

    #[test]
    fn too_few_points_give_none() {
        let pts = pupil().sample_points(5);
        assert!(fit_ellipse_ransac(&pts, &EllipseRansacConfig::default()).is_none());
    }

    #[test]
    fn sample_indices_are_distinct() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut idx = sample_indices(&mut rng, 10, 6);
        idx.sort_unstable();
        idx.dedup();
        assert_eq!(idx.len(), 6);
        assert!(idx.iter().all(|&i| i < 10));
    }
}
