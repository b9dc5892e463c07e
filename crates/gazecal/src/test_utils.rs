//! Synthetic eye, scene and board frames for image-based unit tests.

use image::{GrayImage, Luma};
use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::calibration::BoardSpec;
use crate::camera::CameraIntrinsics;
use crate::homography::Homography;
use crate::marker::dictionary::{bit, code, MARKER_CELLS};

/// Parameters of a synthetic IR eye frame.
#[derive(Debug, Clone)]
pub(crate) struct EyeScene {
    pub width: u32,
    pub height: u32,
    pub pupil_center: [f64; 2],
    /// Semi-axes of the pupil ellipse.
    pub pupil_radii: [f64; 2],
    pub angle: f64,
    pub pupil_level: f64,
    /// Iris disc around the pupil; `0.0` disables it.
    pub iris_radius: f64,
    pub iris_level: f64,
    pub background: f64,
    /// Linear illumination slope per pixel, relative to the frame center.
    pub gradient: [f64; 2],
    /// Corneal reflection: center and radius.
    pub glint: Option<([f64; 2], f64)>,
}

impl Default for EyeScene {
    fn default() -> Self {
        Self {
            width: 192,
            height: 144,
            pupil_center: [96.0, 72.0],
            pupil_radii: [16.0, 16.0],
            angle: 0.0,
            pupil_level: 30.0,
            iris_radius: 0.0,
            iris_level: 110.0,
            background: 170.0,
            gradient: [0.0, 0.0],
            glint: None,
        }
    }
}

pub(crate) fn draw_eye_frame(scene: &EyeScene) -> GrayImage {
    let [cx, cy] = scene.pupil_center;
    let [a, b] = scene.pupil_radii;
    let (s, c) = scene.angle.sin_cos();
    let mx = scene.width as f64 / 2.0;
    let my = scene.height as f64 / 2.0;
    GrayImage::from_fn(scene.width, scene.height, |x, y| {
        let (xf, yf) = (x as f64, y as f64);
        if let Some(([gx, gy], gr)) = scene.glint {
            if (xf - gx).hypot(yf - gy) <= gr {
                return Luma([250]);
            }
        }
        let (dx, dy) = (xf - cx, yf - cy);
        let u = dx * c + dy * s;
        let v = -dx * s + dy * c;
        let base = if (u / a).powi(2) + (v / b).powi(2) <= 1.0 {
            scene.pupil_level
        } else if scene.iris_radius > 0.0 && dx.hypot(dy) <= scene.iris_radius {
            scene.iris_level
        } else {
            scene.background
        };
        let value = base + scene.gradient[0] * (xf - mx) + scene.gradient[1] * (yf - my);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Axis-aligned marker `id` with its top-left pixel at `origin` and square
/// cells of `cell` pixels.
pub(crate) fn draw_marker(img: &mut GrayImage, id: usize, origin: [u32; 2], cell: u32) {
    let payload = code(id).unwrap_or(0);
    let side = MARKER_CELLS as u32 * cell;
    for dy in 0..side {
        for dx in 0..side {
            let (r, c) = ((dy / cell) as usize, (dx / cell) as usize);
            img.put_pixel(origin[0] + dx, origin[1] + dy, Luma([cell_value(payload, r, c)]));
        }
    }
}

/// Marker `id` warped onto `quad` (continuous outer corners, marker top-left
/// first, clockwise). Pixels whose centers fall inside the quad are painted.
pub(crate) fn draw_marker_quad(img: &mut GrayImage, id: usize, quad: [[f64; 2]; 4]) {
    let payload = code(id).unwrap_or(0);
    let n = MARKER_CELLS as f64;
    let canonical = [[0.0, 0.0], [n, 0.0], [n, n], [0.0, n]];
    let Some(to_cells) = Homography::fit(&canonical, &quad)
        .ok()
        .and_then(|h| h.inverse())
    else {
        return;
    };
    let x0 = quad.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min).floor().max(0.0) as u32;
    let y0 = quad.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min).floor().max(0.0) as u32;
    let x1 = quad.iter().map(|p| p[0]).fold(0.0, f64::max).ceil() as u32;
    let y1 = quad.iter().map(|p| p[1]).fold(0.0, f64::max).ceil() as u32;
    for y in y0..=y1.min(img.height() - 1) {
        for x in x0..=x1.min(img.width() - 1) {
            let [u, v] = to_cells.project([x as f64, y as f64]);
            if (0.0..n).contains(&u) && (0.0..n).contains(&v) {
                img.put_pixel(x, y, Luma([cell_value(payload, v as usize, u as usize)]));
            }
        }
    }
}

fn cell_value(payload: u16, r: usize, c: usize) -> u8 {
    let last = MARKER_CELLS - 1;
    if r == 0 || c == 0 || r == last || c == last || !bit(payload, r - 1, c - 1) {
        0
    } else {
        255
    }
}

/// Camera that sees the rendered board views.
pub(crate) const VIEW_CAMERA: CameraIntrinsics = CameraIntrinsics {
    fx: 560.0,
    fy: 560.0,
    cx: 324.0,
    cy: 236.0,
};

pub(crate) const VIEW_SIZE: (u32, u32) = (640, 480);

/// Board-plane to image homography for `board` centered on the optical axis
/// at distance `z` (board units) after rotation `rot`.
pub(crate) fn board_pose(board: &BoardSpec, rot: Rotation3<f64>, z: f64) -> Homography {
    let (bw, bh) = board.extent();
    let r = rot.matrix();
    let center = Vector3::new(bw / 2.0, bh / 2.0, 0.0);
    let t = Vector3::new(0.0, 0.0, z) - r * center;
    let mut m = Matrix3::zeros();
    m.set_column(0, &r.column(0).into_owned());
    m.set_column(1, &r.column(1).into_owned());
    m.set_column(2, &t);
    Homography(VIEW_CAMERA.matrix3() * m)
}

/// Every marker of `board` drawn through `h` on a light background.
pub(crate) fn render_board_view(board: &BoardSpec, h: &Homography) -> GrayImage {
    let mut img = GrayImage::from_pixel(VIEW_SIZE.0, VIEW_SIZE.1, Luma([235]));
    for id in 0..board.marker_count() {
        if let Some(obj) = board.object_corners(id) {
            draw_marker_quad(&mut img, id, obj.map(|p| h.project(p)));
        }
    }
    img
}
