//! Pinhole scene-camera model with Brown-Conrady lens distortion.
//!
//! Coefficient vectors use the conventional `[k1, k2, p1, p2, k3]` order so a
//! calibration artifact can be consumed by other tools unchanged.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixels (zero skew).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn is_valid(self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    pub fn pixel_to_normalized(self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        if !self.is_valid() {
            return None;
        }
        let x = (pixel[0] - self.cx) / self.fx;
        let y = (pixel[1] - self.cy) / self.fy;
        (x.is_finite() && y.is_finite()).then_some([x, y])
    }

    pub fn normalized_to_pixel(self, n: [f64; 2]) -> [f64; 2] {
        [self.fx * n[0] + self.cx, self.fy * n[1] + self.cy]
    }

    /// Row-major camera matrix `K`.
    pub fn to_matrix(self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Intrinsics from a row-major camera matrix; skew is ignored.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Self {
        Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        }
    }

    pub fn matrix3(self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RadialTangentialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl RadialTangentialDistortion {
    pub fn distort_normalized(self, n: [f64; 2]) -> [f64; 2] {
        let [x, y] = n;
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let (dx, dy) = self.tangential(x, y, r2);
        [x * radial + dx, y * radial + dy]
    }

    fn tangential(self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// `[k1, k2, p1, p2, k3]`.
    pub fn coefficients(self) -> Vec<f64> {
        vec![self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Inverse of [`coefficients`](Self::coefficients); missing trailing terms are zero.
    pub fn from_coefficients(c: &[f64]) -> Self {
        let at = |i: usize| c.get(i).copied().unwrap_or(0.0);
        Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: RadialTangentialDistortion,
}

/// Fixed-point iterations used to invert the distortion.
const UNDISTORT_ITERS: usize = 20;

impl CameraModel {
    /// Undistorted (ideal pinhole) pixel to observed pixel.
    pub fn distort_pixel(self, ideal: [f64; 2]) -> Option<[f64; 2]> {
        let n = self.intrinsics.pixel_to_normalized(ideal)?;
        let p = self
            .intrinsics
            .normalized_to_pixel(self.distortion.distort_normalized(n));
        (p[0].is_finite() && p[1].is_finite()).then_some(p)
    }

    /// Observed pixel to normalized ideal coordinates.
    pub fn undistort_normalized(self, observed: [f64; 2]) -> Option<[f64; 2]> {
        let d = self.intrinsics.pixel_to_normalized(observed)?;
        let [mut x, mut y] = d;
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let k = self.distortion;
            let radial = 1.0 + r2 * (k.k1 + r2 * (k.k2 + r2 * k.k3));
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let (dx, dy) = k.tangential(x, y, r2);
            let nx = (d[0] - dx) / radial;
            let ny = (d[1] - dy) / radial;
            let step = (nx - x).hypot(ny - y);
            x = nx;
            y = ny;
            if !step.is_finite() {
                return None;
            }
            if step < 1e-12 {
                break;
            }
        }
        Some([x, y])
    }

    pub fn undistort_pixel(self, observed: [f64; 2]) -> Option<[f64; 2]> {
        self.undistort_normalized(observed)
            .map(|n| self.intrinsics.normalized_to_pixel(n))
    }
}
