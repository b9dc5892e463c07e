//! Ellipse fitting for pupil contours.
//!
//! - Direct least-squares conic fit (Fitzgibbon et al. 1999) on normalized
//!   points, with the reduced 3×3 eigenproblem of Halíř & Flusser.
//! - Conversion between implicit conic coefficients and geometric ellipses.
//! - Seeded RANSAC wrapper scoring candidates by Sampson distance.

mod fit;
mod ransac;

pub use fit::fit_ellipse_direct;
pub use ransac::{fit_ellipse_ransac, EllipseRansacConfig, EllipseRansacResult};
pub(crate) use ransac::sample_indices;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Implicit conic `A x² + B xy + C y² + D x + E y + F = 0`, stored as `[A..F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conic(pub [f64; 6]);

impl Conic {
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Geometric parameters, or `None` for hyperbolae, parabolae and
    /// imaginary or degenerate ellipses.
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        let [a, b, c, d, e, f] = self.0;
        let det2 = 4.0 * a * c - b * b;
        if det2 <= 0.0 {
            return None;
        }
        let q = Matrix3::new(
            a,
            b / 2.0,
            d / 2.0,
            b / 2.0,
            c,
            e / 2.0,
            d / 2.0,
            e / 2.0,
            f,
        );
        if q.determinant().abs() < 1e-300 {
            return None;
        }

        let cx = (b * e - 2.0 * c * d) / det2;
        let cy = (b * d - 2.0 * a * e) / det2;
        let f0 = self.eval(cx, cy);

        // Eigenvalues of the quadratic part; lam_hi >= lam_lo > 0 for an ellipse.
        let mean = 0.5 * (a + c);
        let half_gap = (0.25 * (a - c).powi(2) + 0.25 * b * b).sqrt();
        let lam_hi = mean + half_gap;
        let lam_lo = mean - half_gap;

        let major_sq = -f0 / lam_lo;
        let minor_sq = -f0 / lam_hi;
        if !(major_sq > 0.0 && minor_sq > 0.0) {
            return None;
        }

        // Major axis follows the eigenvector of the smaller eigenvalue.
        let angle = if b.abs() < 1e-300 && (a - c).abs() < 1e-300 {
            0.0
        } else {
            0.5 * b.atan2(a - c) + std::f64::consts::FRAC_PI_2
        };

        let ellipse = Ellipse {
            cx,
            cy,
            a: major_sq.sqrt(),
            b: minor_sq.sqrt(),
            angle: wrap_half_turn(angle),
        };
        ellipse.is_valid().then_some(ellipse)
    }
}

/// Geometric ellipse. `a >= b` are the semi-axes, `angle` orients the major
/// axis from +x in (−π/2, π/2].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub cx: f64,
    pub cy: f64,
    pub a: f64,
    pub b: f64,
    pub angle: f64,
}

impl Ellipse {
    pub fn is_valid(&self) -> bool {
        [self.cx, self.cy, self.a, self.b, self.angle]
            .iter()
            .all(|v| v.is_finite())
            && self.a > 0.0
            && self.b > 0.0
    }

    pub fn to_conic(&self) -> Conic {
        let (s, c) = self.angle.sin_cos();
        let ia2 = 1.0 / (self.a * self.a);
        let ib2 = 1.0 / (self.b * self.b);
        let qa = c * c * ia2 + s * s * ib2;
        let qb = 2.0 * c * s * (ia2 - ib2);
        let qc = s * s * ia2 + c * c * ib2;
        let qd = -2.0 * qa * self.cx - qb * self.cy;
        let qe = -qb * self.cx - 2.0 * qc * self.cy;
        let qf = qa * self.cx * self.cx + qb * self.cx * self.cy + qc * self.cy * self.cy - 1.0;
        Conic([qa, qb, qc, qd, qe, qf])
    }

    /// `n` points evenly spaced in the eccentric anomaly.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (s, c) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * i as f64 / n as f64;
                let (u, v) = (self.a * t.cos(), self.b * t.sin());
                [self.cx + c * u - s * v, self.cy + s * u + c * v]
            })
            .collect()
    }

    /// First-order geometric distance of a point to the boundary.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        sampson_distance(&self.to_conic(), x, y)
    }
}

pub(crate) fn sampson_distance(conic: &Conic, x: f64, y: f64) -> f64 {
    let [a, b, c, d, e, _] = conic.0;
    let value = conic.eval(x, y);
    let gx = 2.0 * a * x + b * y + d;
    let gy = b * x + 2.0 * c * y + e;
    let g = (gx * gx + gy * gy).sqrt();
    if g < 1e-15 {
        value.abs()
    } else {
        value.abs() / g
    }
}

fn wrap_half_turn(mut angle: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}
