//! Refined camera matrix and frame undistortion.

use image::{GrayImage, Luma};

use crate::camera::{CameraIntrinsics, CameraModel};

const GRID: usize = 9;

/// Camera matrix for undistorted frames of the same size.
///
/// `alpha = 0` zooms so that every output pixel has a valid source pixel;
/// `alpha = 1` keeps every source pixel in view. Values in between blend the
/// two linearly. Falls back to the calibrated intrinsics when the border
/// cannot be undistorted.
pub fn optimal_new_camera_matrix(
    model: &CameraModel,
    image_size: (u32, u32),
    alpha: f64,
) -> CameraIntrinsics {
    let (w, h) = (image_size.0 as f64 - 1.0, image_size.1 as f64 - 1.0);
    let mut grid = [[[0.0; 2]; GRID]; GRID];
    for (r, row) in grid.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            let p = [w * c as f64 / (GRID - 1) as f64, h * r as f64 / (GRID - 1) as f64];
            match model.undistort_normalized(p) {
                Some(n) => *cell = n,
                None => return model.intrinsics,
            }
        }
    }

    let all = grid.iter().flatten();
    let outer = (
        all.clone().map(|p| p[0]).fold(f64::INFINITY, f64::min),
        all.clone().map(|p| p[1]).fold(f64::INFINITY, f64::min),
        all.clone().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max),
        all.map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max),
    );
    let last = GRID - 1;
    let inner = (
        (0..GRID).map(|r| grid[r][0][0]).fold(f64::NEG_INFINITY, f64::max),
        (0..GRID).map(|c| grid[0][c][1]).fold(f64::NEG_INFINITY, f64::max),
        (0..GRID).map(|r| grid[r][last][0]).fold(f64::INFINITY, f64::min),
        (0..GRID).map(|c| grid[last][c][1]).fold(f64::INFINITY, f64::min),
    );

    let fit = |(x0, y0, x1, y1): (f64, f64, f64, f64)| {
        let fx = w / (x1 - x0);
        let fy = h / (y1 - y0);
        (fx, fy, -fx * x0, -fy * y0)
    };
    let (fx0, fy0, cx0, cy0) = fit(inner);
    let (fx1, fy1, cx1, cy1) = fit(outer);
    let a = alpha.clamp(0.0, 1.0);
    let k = CameraIntrinsics {
        fx: fx0 * (1.0 - a) + fx1 * a,
        fy: fy0 * (1.0 - a) + fy1 * a,
        cx: cx0 * (1.0 - a) + cx1 * a,
        cy: cy0 * (1.0 - a) + cy1 * a,
    };
    if k.is_valid() {
        k
    } else {
        model.intrinsics
    }
}

/// Resample `gray` into an undistorted frame with camera matrix `target`.
/// Pixels without a source are black.
pub fn undistort_image(gray: &GrayImage, model: &CameraModel, target: CameraIntrinsics) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = target
            .pixel_to_normalized([x as f64, y as f64])
            .map(|n| {
                model
                    .intrinsics
                    .normalized_to_pixel(model.distortion.distort_normalized(n))
            })
            .and_then(|p| bilinear(gray, p[0], p[1]))
            .unwrap_or(0.0);
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

fn bilinear(img: &GrayImage, x: f64, y: f64) -> Option<f64> {
    let (w, h) = img.dimensions();
    if !(x >= 0.0 && y >= 0.0) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    if x0 + 1 >= w || y0 + 1 >= h {
        return None;
    }
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let p = |dx: u32, dy: u32| img.get_pixel(x0 + dx, y0 + dy)[0] as f64;
    Some(
        (1.0 - fx) * (1.0 - fy) * p(0, 0)
            + fx * (1.0 - fy) * p(1, 0)
            + (1.0 - fx) * fy * p(0, 1)
            + fx * fy * p(1, 1),
    )
}
