//! Illumination detrending and denoising for eye-camera frames.
//!
//! IR eye cameras see a smooth spatial intensity gradient from the illuminator.
//! Each frame is regressed on a fixed per-pixel basis (intercept, centered
//! column and row offsets, radial distance from the frame center), the fitted
//! trend is folded back in, and the result is stretched to the full 0..255
//! range before median filtering.
//!
//! The basis only depends on the frame size, so its normal matrix is factorized
//! once and reused for every frame of a recording.

use image::GrayImage;
use nalgebra::{Cholesky, Matrix4, Vector4, U4};
use serde::{Deserialize, Serialize};

const BASIS_LEN: usize = 4;

/// How the fitted trend is combined with the raw intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCorrection {
    /// Add the fitted trend to the frame, as the recorded processing does.
    #[default]
    AddFitted,
    /// Subtract the fitted trend (classic residual flattening).
    SubtractFitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetrendError {
    DimensionMismatch { expected: (u32, u32), got: (u32, u32) },
    /// The normal matrix of the basis is singular (frame too small).
    SingularBasis,
}

impl std::fmt::Display for DetrendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DimensionMismatch { expected, got } => {
                write!(f, "frame size {:?} does not match basis {:?}", got, expected)
            }
            Self::SingularBasis => write!(f, "detrend basis is rank deficient"),
        }
    }
}

impl std::error::Error for DetrendError {}

/// Precomputed regression basis for one frame size.
#[derive(Debug, Clone)]
pub struct DetrendBasis {
    width: u32,
    height: u32,
    regressors: Vec<[f64; BASIS_LEN]>,
    normal: Option<Cholesky<f64, U4>>,
}

impl DetrendBasis {
    pub fn new(width: u32, height: u32) -> Self {
        let half_w = (width / 2) as f64;
        let half_h = (height / 2) as f64;
        let mut regressors = Vec::with_capacity(width as usize * height as usize);
        let mut btb = Matrix4::<f64>::zeros();
        for y in 0..height {
            for x in 0..width {
                let dx = x as f64 - half_w;
                let dy = y as f64 - half_h;
                let r = [1.0, dx, dy, dx.hypot(dy)];
                let v = Vector4::from(r);
                btb += v * v.transpose();
                regressors.push(r);
            }
        }
        Self {
            width,
            height,
            regressors,
            normal: Cholesky::new(btb),
        }
    }

    /// Least-squares trend coefficients `[intercept, col, row, radial]`.
    pub fn fit(&self, gray: &GrayImage) -> Result<[f64; BASIS_LEN], DetrendError> {
        self.check_dimensions(gray)?;
        let normal = self.normal.as_ref().ok_or(DetrendError::SingularBasis)?;
        let mut bty = Vector4::<f64>::zeros();
        for (r, p) in self.regressors.iter().zip(gray.pixels()) {
            let v = p[0] as f64;
            for k in 0..BASIS_LEN {
                bty[k] += r[k] * v;
            }
        }
        let coef = normal.solve(&bty);
        Ok([coef[0], coef[1], coef[2], coef[3]])
    }

    /// Fold the fitted trend into the frame and stretch to 0..255.
    ///
    /// A frame with no intensity range after correction maps to all zeros.
    pub fn detrend(
        &self,
        gray: &GrayImage,
        mode: TrendCorrection,
    ) -> Result<GrayImage, DetrendError> {
        let coef = self.fit(gray)?;
        let sign = match mode {
            TrendCorrection::AddFitted => 1.0,
            TrendCorrection::SubtractFitted => -1.0,
        };

        let corrected: Vec<f64> = self
            .regressors
            .iter()
            .zip(gray.pixels())
            .map(|(r, p)| {
                let trend: f64 = r.iter().zip(coef.iter()).map(|(a, b)| a * b).sum();
                p[0] as f64 + sign * trend
            })
            .collect();

        let min = corrected.iter().copied().fold(f64::INFINITY, f64::min);
        let max = corrected.iter().map(|v| v - min).fold(0.0f64, f64::max);
        // Sub-quantum ranges are numerical residue of a flat frame.
        let scale = if max > 1e-3 { 255.0 / max } else { 0.0 };

        let data: Vec<u8> = corrected
            .iter()
            .map(|v| ((v - min) * scale).round().clamp(0.0, 255.0) as u8)
            .collect();
        Ok(GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height)))
    }

    fn check_dimensions(&self, gray: &GrayImage) -> Result<(), DetrendError> {
        if gray.dimensions() != (self.width, self.height) {
            return Err(DetrendError::DimensionMismatch {
                expected: (self.width, self.height),
                got: gray.dimensions(),
            });
        }
        Ok(())
    }
}

/// Median filter with an odd square kernel (`kernel = 2 * radius + 1`).
pub fn median_denoise(gray: &GrayImage, kernel: u32) -> GrayImage {
    let radius = kernel / 2;
    if radius == 0 {
        return gray.clone();
    }
    imageproc::filter::median_filter(gray, radius, radius)
}

/// Population variance of the pixel intensities.
pub fn intensity_variance(gray: &GrayImage) -> f64 {
    let n = (gray.width() as usize * gray.height() as usize).max(1) as f64;
    let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    gray.pixels()
        .map(|p| (p[0] as f64 - mean).powi(2))
        .sum::<f64>()
        / n
}

/// Detrend then median-filter one frame.
pub fn preprocess(
    basis: &DetrendBasis,
    gray: &GrayImage,
    mode: TrendCorrection,
    median_kernel: u32,
) -> Result<GrayImage, DetrendError> {
    let detrended = basis.detrend(gray, mode)?;
    Ok(median_denoise(&detrended, median_kernel))
}
