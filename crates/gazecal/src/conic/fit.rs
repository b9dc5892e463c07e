//! Direct least-squares ellipse fit.

use nalgebra::{Matrix3, Vector3};

use super::{Conic, Ellipse};

/// Fit an ellipse to at least 6 points.
///
/// Points are shifted to their centroid and scaled to unit RMS radius before
/// building the scatter matrix, and the fitted conic is mapped back.
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic(points)?.to_ellipse()
}

pub(crate) fn fit_conic(points: &[[f64; 2]]) -> Option<Conic> {
    if points.len() < 6 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let rms = (points
        .iter()
        .map(|p| (p[0] - mx).powi(2) + (p[1] - my).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    if !(rms > 1e-12) {
        return None;
    }
    let s = 1.0 / rms;

    // Scatter blocks for quadratic terms [x², xy, y²] and linear terms [x, y, 1].
    let mut s1 = Matrix3::<f64>::zeros();
    let mut s2 = Matrix3::<f64>::zeros();
    let mut s3 = Matrix3::<f64>::zeros();
    for p in points {
        let x = (p[0] - mx) * s;
        let y = (p[1] - my) * s;
        let q = Vector3::new(x * x, x * y, y * y);
        let l = Vector3::new(x, y, 1.0);
        s1 += q * q.transpose();
        s2 += q * l.transpose();
        s3 += l * l.transpose();
    }

    let s3_inv = s3.try_inverse()?;
    let t = -s3_inv * s2.transpose();
    let reduced = s1 + s2 * t;
    // Inverse of the ellipse constraint matrix [[0,0,2],[0,-1,0],[2,0,0]].
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let m = c1_inv * reduced;

    let quad = constrained_eigenvector(&m)?;
    let lin = t * quad;
    Some(denormalize(
        [quad[0], quad[1], quad[2], lin[0], lin[1], lin[2]],
        mx,
        my,
        s,
    ))
}

/// The eigenvector of `m` satisfying the ellipse constraint `4ac − b² > 0`.
///
/// Eigenvalues come from the real Schur form; each eigenvector is the right
/// singular vector of `m − λI` with the smallest singular value.
fn constrained_eigenvector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let eig = m.complex_eigenvalues();
    let scale = m.norm().max(1e-300);
    let mut best: Option<(f64, Vector3<f64>)> = None;
    for lambda in eig.iter() {
        if lambda.im.abs() > 1e-9 * scale {
            continue;
        }
        let shifted = m - Matrix3::identity() * lambda.re;
        let svd = shifted.svd(false, true);
        let v_t = svd.v_t?;
        let (k, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let v: Vector3<f64> = v_t.row(k).transpose();
        let constraint = 4.0 * v[0] * v[2] - v[1] * v[1];
        if constraint > 0.0 && best.as_ref().map_or(true, |(c, _)| constraint > *c) {
            best = Some((constraint, v));
        }
    }
    best.map(|(_, v)| v)
}

/// Map a conic fitted in `x' = s (x − mx)`, `y' = s (y − my)` back to pixels.
fn denormalize(c: [f64; 6], mx: f64, my: f64, s: f64) -> Conic {
    let [a, b, cc, d, e, f] = c;
    let s2 = s * s;
    Conic([
        a * s2,
        b * s2,
        cc * s2,
        -2.0 * a * s2 * mx - b * s2 * my + d * s,
        -b * s2 * mx - 2.0 * cc * s2 * my + e * s,
        a * s2 * mx * mx + b * s2 * mx * my + cc * s2 * my * my - d * s * mx - e * s * my + f,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn pupil() -> Ellipse {
        Ellipse {
            cx: 160.0,
            cy: 118.0,
            a: 24.0,
            b: 17.0,
            angle: -0.6,
        }
    }

    #[test]
    fn exact_points_are_recovered() {
        let e = pupil();
        let fitted = fit_ellipse_direct(&e.sample_points(40)).unwrap();
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 1e-6);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 1e-6);
        assert_relative_eq!(fitted.a, e.a, epsilon = 1e-6);
        assert_relative_eq!(fitted.b, e.b, epsilon = 1e-6);
        assert_relative_eq!(fitted.angle, e.angle, epsilon = 1e-6);
    }

    #[test]
    fn circle_is_recovered() {
        let e = Ellipse {
            cx: 30.0,
            cy: 40.0,
            a: 12.0,
            b: 12.0,
            angle: 0.0,
        };
        let fitted = fit_ellipse_direct(&e.sample_points(24)).unwrap();
        assert_relative_eq!(fitted.cx, 30.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.a, 12.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.b, 12.0, epsilon = 1e-6);
    }

    #[test]
    fn noisy_points_stay_close() {
        let e = pupil();
        let mut rng = StdRng::seed_from_u64(5);
        let pts: Vec<[f64; 2]> = e
            .sample_points(180)
            .into_iter()
            .map(|[x, y]| [x + rng.gen_range(-0.4..0.4), y + rng.gen_range(-0.4..0.4)])
            .collect();
        let fitted = fit_ellipse_direct(&pts).unwrap();
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 0.5);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 0.5);
        assert_relative_eq!(fitted.a, e.a, epsilon = 1.0);
        assert_relative_eq!(fitted.b, e.b, epsilon = 1.0);
    }

    #[test]
    fn too_few_points_fail() {
        assert!(fit_ellipse_direct(&pupil().sample_points(5)).is_none());
    }
}
