//! Planar homographies from point correspondences (normalized DLT).
//!
//! Used to sample marker cells from their image quads and to relate the
//! calibration board plane to each calibration view.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};

#[derive(Debug, Clone, PartialEq)]
pub enum HomographyError {
    TooFewPoints { needed: usize, got: usize },
    LengthMismatch { src: usize, dst: usize },
    Degenerate,
}

impl std::fmt::Display for HomographyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few correspondences: need {}, got {}", needed, got)
            }
            Self::LengthMismatch { src, dst } => {
                write!(f, "{} source points but {} destination points", src, dst)
            }
            Self::Degenerate => write!(f, "degenerate point configuration"),
        }
    }
}

impl std::error::Error for HomographyError {}

/// `dst ~ H · [src, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    /// DLT on Hartley-normalized points; needs at least four correspondences.
    pub fn fit(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Self, HomographyError> {
        if src.len() != dst.len() {
            return Err(HomographyError::LengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        let n = src.len();
        if n < 4 {
            return Err(HomographyError::TooFewPoints { needed: 4, got: n });
        }

        let (t_src, src_n) = hartley(src).ok_or(HomographyError::Degenerate)?;
        let (t_dst, dst_n) = hartley(dst).ok_or(HomographyError::Degenerate)?;

        let mut a = DMatrix::<f64>::zeros(2 * n, 9);
        for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
            let (x, y, u, v) = (s[0], s[1], d[0], d[1]);
            let r = 2 * i;
            a.row_mut(r)
                .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u]);
            a.row_mut(r + 1)
                .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v]);
        }

        // Null vector of A from the smallest eigenpair of AᵀA.
        let eig = SymmetricEigen::new(a.transpose() * &a);
        let (k, _) = eig
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|p, q| p.1.total_cmp(q.1))
            .ok_or(HomographyError::Degenerate)?;
        let h = eig.eigenvectors.column(k);
        let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
        let mut m = t_dst_inv * h_n * t_src;
        let w = m[(2, 2)];
        if w.abs() > 1e-15 {
            m /= w;
        }
        if !m.iter().all(|v| v.is_finite()) || m.determinant().abs() < 1e-15 {
            return Err(HomographyError::Degenerate);
        }
        Ok(Self(m))
    }

    pub fn project(&self, p: [f64; 2]) -> [f64; 2] {
        let q = self.0 * Vector3::new(p[0], p[1], 1.0);
        if q[2].abs() < 1e-15 {
            return [f64::NAN, f64::NAN];
        }
        [q[0] / q[2], q[1] / q[2]]
    }

    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// Root-mean-square transfer error `|H·src − dst|`.
    pub fn rms_error(&self, src: &[[f64; 2]], dst: &[[f64; 2]]) -> f64 {
        let n = src.len().min(dst.len());
        if n == 0 {
            return f64::NAN;
        }
        let sum: f64 = src
            .iter()
            .zip(dst)
            .map(|(s, d)| {
                let p = self.project(*s);
                (p[0] - d[0]).powi(2) + (p[1] - d[1]).powi(2)
            })
            .sum();
        (sum / n as f64).sqrt()
    }
}

/// Similarity moving the centroid to the origin with mean radius √2.
fn hartley(pts: &[[f64; 2]]) -> Option<(Matrix3<f64>, Vec<[f64; 2]>)> {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_r = pts
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / n;
    if !(mean_r > 1e-12) {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_r;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    Some((t, out))
}
