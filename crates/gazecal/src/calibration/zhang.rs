//! Closed-form planar calibration: Zhang's intrinsics from view homographies
//! and a linear radial-tangential distortion fit on homography residuals.

use nalgebra::{DMatrix, DVector, Matrix3, SVector, SymmetricEigen, Vector3};

use super::CalibrationError;
use crate::camera::{CameraIntrinsics, RadialTangentialDistortion};

/// One view: ideal (undistorted) board-to-pixel homography plus its raw
/// correspondences.
pub(crate) struct ViewGeometry<'a> {
    pub homography: Matrix3<f64>,
    pub object: &'a [[f64; 2]],
    pub image: &'a [[f64; 2]],
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zero-skew intrinsics from at least three board homographies.
///
/// Homographies are first mapped into a frame-centered unit scale so the
/// conic constraints are well conditioned.
pub(crate) fn intrinsics_from_homographies(
    homographies: &[Matrix3<f64>],
    image_size: (u32, u32),
) -> Result<CameraIntrinsics, CalibrationError> {
    if homographies.len() < 3 {
        return Err(CalibrationError::TooFewViews {
            needed: 3,
            found: homographies.len(),
        });
    }
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let s = 0.5 * (w + h);
    let t = Matrix3::new(1.0 / s, 0.0, -0.5 * w / s, 0.0, 1.0 / s, -0.5 * h / s, 0.0, 0.0, 1.0);

    let m = homographies.len();
    let mut v = DMatrix::<f64>::zeros(2 * m + 1, 6);
    for (k, hk) in homographies.iter().enumerate() {
        let hn = t * hk;
        let norm = hn.norm();
        if !(norm > 1e-15) {
            return Err(CalibrationError::Degenerate("null homography"));
        }
        let hn = hn / norm;
        v.row_mut(2 * k).copy_from(&v_ij(&hn, 0, 1).transpose());
        v.row_mut(2 * k + 1)
            .copy_from(&(v_ij(&hn, 0, 0) - v_ij(&hn, 1, 1)).transpose());
    }
    // Zero skew: B12 = 0.
    v[(2 * m, 1)] = 1.0;

    let eig = SymmetricEigen::new(v.transpose() * &v);
    let (idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(CalibrationError::Degenerate("empty constraint system"))?;
    let mut b = eig.eigenvectors.column(idx).into_owned();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if !(denom.abs() > 1e-12 * (b11 * b11 + b22 * b22)) {
        return Err(CalibrationError::Degenerate("views do not constrain the focal length"));
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    let alpha2 = lambda / b11;
    let beta2 = lambda * b11 / denom;
    if !(alpha2 > 0.0 && beta2 > 0.0) {
        return Err(CalibrationError::Degenerate("image of the absolute conic is not positive"));
    }
    let alpha = alpha2.sqrt();
    let beta = beta2.sqrt();
    let gamma = -b12 * alpha2 * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha2 / lambda;

    let k = CameraIntrinsics {
        fx: s * alpha,
        fy: s * beta,
        cx: s * u0 + 0.5 * w,
        cy: s * v0 + 0.5 * h,
    };
    if k.is_valid() {
        Ok(k)
    } else {
        Err(CalibrationError::Degenerate("non-finite intrinsics"))
    }
}

/// Linear least-squares `[k1, k2, p1, p2]` from the residuals between raw
/// observations and ideal homography predictions, in normalized coordinates.
pub(crate) fn fit_distortion(
    k: CameraIntrinsics,
    views: &[ViewGeometry<'_>],
) -> Result<RadialTangentialDistortion, CalibrationError> {
    let total: usize = views.iter().map(|v| v.object.len().min(v.image.len())).sum();
    if total < 4 {
        return Err(CalibrationError::Degenerate("too few corners for a distortion fit"));
    }

    let mut a = DMatrix::<f64>::zeros(2 * total, 4);
    let mut rhs = DVector::<f64>::zeros(2 * total);
    let mut row = 0;
    let mut max_r2: f64 = 0.0;
    for view in views {
        for (o, p) in view.object.iter().zip(view.image) {
            let q = view.homography * Vector3::new(o[0], o[1], 1.0);
            let ideal = [q[0] / q[2], q[1] / q[2]];
            let (Some(n), Some(obs)) = (k.pixel_to_normalized(ideal), k.pixel_to_normalized(*p))
            else {
                return Err(CalibrationError::Degenerate("invalid intrinsics"));
            };
            let [x, y] = n;
            let r2 = x * x + y * y;
            max_r2 = max_r2.max(r2);
            a.row_mut(row)
                .copy_from_slice(&[x * r2, x * r2 * r2, 2.0 * x * y, r2 + 2.0 * x * x]);
            a.row_mut(row + 1)
                .copy_from_slice(&[y * r2, y * r2 * r2, r2 + 2.0 * y * y, 2.0 * x * y]);
            rhs[row] = obs[0] - x;
            rhs[row + 1] = obs[1] - y;
            row += 2;
        }
    }
    if max_r2 < 1e-6 {
        return Err(CalibrationError::Degenerate("corners cluster at the principal point"));
    }

    let x = a
        .svd(true, true)
        .solve(&rhs, 1e-12)
        .map_err(|_| CalibrationError::Degenerate("distortion solve failed"))?;
    Ok(RadialTangentialDistortion {
        k1: x[0],
        k2: x[1],
        p1: x[2],
        p2: x[3],
        k3: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    fn truth() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 620.0,
            fy: 615.0,
            cx: 318.0,
            cy: 244.0,
        }
    }

    fn board_homography(k: &CameraIntrinsics, rot: Rotation3<f64>, t: Vector3<f64>) -> Matrix3<f64> {
        let r = rot.matrix();
        let mut h = Matrix3::zeros();
        h.set_column(0, &r.column(0).into_owned());
        h.set_column(1, &r.column(1).into_owned());
        h.set_column(2, &t);
        k.matrix3() * h
    }

    fn views() -> Vec<Matrix3<f64>> {
        let k = truth();
        vec![
            board_homography(&k, Rotation3::from_euler_angles(0.3, 0.0, 0.05), Vector3::new(-0.4, -0.2, 1.6)),
            board_homography(&k, Rotation3::from_euler_angles(-0.1, 0.35, -0.1), Vector3::new(-0.3, -0.25, 1.4)),
            board_homography(&k, Rotation3::from_euler_angles(0.2, -0.3, 0.2), Vector3::new(-0.5, -0.1, 1.8)),
            board_homography(&k, Rotation3::from_euler_angles(-0.25, -0.2, 0.0), Vector3::new(-0.35, -0.3, 1.5)),
        ]
    }

    #[test]
    fn recovers_intrinsics_from_exact_homographies() {
        let est = intrinsics_from_homographies(&views(), (640, 480)).unwrap();
        let gt = truth();
        assert!((est.fx - gt.fx).abs() < 1e-3 * gt.fx, "fx {}", est.fx);
        assert!((est.fy - gt.fy).abs() < 1e-3 * gt.fy, "fy {}", est.fy);
        assert!((est.cx - gt.cx).abs() < 0.5, "cx {}", est.cx);
        assert!((est.cy - gt.cy).abs() < 0.5, "cy {}", est.cy);
    }

    #[test]
    fn two_views_are_rejected() {
        let err = intrinsics_from_homographies(&views()[..2], (640, 480)).unwrap_err();
        assert!(matches!(err, CalibrationError::TooFewViews { needed: 3, found: 2 }));
    }

    #[test]
    fn distortion_fit_recovers_radial_terms() {
        let k = truth();
        let dist = RadialTangentialDistortion {
            k1: -0.18,
            k2: 0.04,
            p1: 0.001,
            p2: -0.0005,
            k3: 0.0,
        };
        let hs = views();
        let object: Vec<[f64; 2]> = (0..8)
            .flat_map(|r| (0..10).map(move |c| [c as f64 * 0.08, r as f64 * 0.08]))
            .collect();
        let images: Vec<Vec<[f64; 2]>> = hs
            .iter()
            .map(|h| {
                object
                    .iter()
                    .map(|o| {
                        let q = h * Vector3::new(o[0], o[1], 1.0);
                        let n = k.pixel_to_normalized([q[0] / q[2], q[1] / q[2]]).unwrap();
                        k.normalized_to_pixel(dist.distort_normalized(n))
                    })
                    .collect()
            })
            .collect();
        let geometry: Vec<ViewGeometry<'_>> = hs
            .iter()
            .zip(&images)
            .map(|(h, img)| ViewGeometry {
                homography: *h,
                object: &object,
                image: img,
            })
            .collect();
        let est = fit_distortion(k, &geometry).unwrap();
        assert!((est.k1 - dist.k1).abs() < 5e-3, "k1 {}", est.k1);
        assert!((est.p1 - dist.p1).abs() < 5e-4, "p1 {}", est.p1);
        assert!((est.p2 - dist.p2).abs() < 5e-4, "p2 {}", est.p2);
    }
}
