//! Annotated QA frames.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_filled_circle_mut, draw_line_segment_mut};

use crate::cluster::TargetMeasurement;
use crate::conic::Ellipse;
use crate::marker::DetectedMarker;
use crate::pupil::PupilEllipse;

const PUPIL: Rgb<u8> = Rgb([255, 64, 64]);
const MARKER: Rgb<u8> = Rgb([64, 220, 64]);
const ORIGIN: Rgb<u8> = Rgb([64, 128, 255]);
const TARGET: Rgb<u8> = Rgb([255, 200, 0]);
const GAZE: Rgb<u8> = Rgb([255, 0, 255]);

fn polyline(img: &mut RgbImage, pts: &[[f64; 2]], color: Rgb<u8>) {
    for (i, a) in pts.iter().enumerate() {
        let b = pts[(i + 1) % pts.len()];
        draw_line_segment_mut(
            img,
            (a[0] as f32, a[1] as f32),
            (b[0] as f32, b[1] as f32),
            color,
        );
    }
}

/// Eye frame with the fitted pupil outline and center.
pub fn pupil_overlay(gray: &GrayImage, pupil: &PupilEllipse) -> DynamicImage {
    let mut img = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
    if pupil.confidence > 0.0 {
        let e = Ellipse {
            cx: pupil.center_x,
            cy: pupil.center_y,
            a: 0.5 * pupil.major_axis,
            b: 0.5 * pupil.minor_axis,
            angle: pupil.angle,
        };
        polyline(&mut img, &e.sample_points(64), PUPIL);
        draw_cross_mut(
            &mut img,
            PUPIL,
            pupil.center_x.round() as i32,
            pupil.center_y.round() as i32,
        );
    }
    DynamicImage::ImageRgb8(img)
}

/// Scene frame with marker outlines, each marker's first corner and the
/// target centroid.
pub fn marker_overlay(
    gray: &GrayImage,
    markers: &[DetectedMarker],
    target: &TargetMeasurement,
) -> DynamicImage {
    let mut img = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
    for m in markers {
        polyline(&mut img, &m.corners, MARKER);
        let c0 = m.corners[0];
        draw_filled_circle_mut(&mut img, (c0[0].round() as i32, c0[1].round() as i32), 2, ORIGIN);
    }
    if target.found {
        let (x, y) = (target.centroid_x.round() as i32, target.centroid_y.round() as i32);
        draw_filled_circle_mut(&mut img, (x, y), 4, TARGET);
    }
    DynamicImage::ImageRgb8(img)
}

/// Scene frame with the predicted gaze position; unchanged when the gaze is
/// missing (blink or no eye sample).
pub fn gaze_overlay(gray: &GrayImage, gaze: (f64, f64)) -> DynamicImage {
    let mut img = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
    if gaze.0.is_finite() && gaze.1.is_finite() {
        draw_filled_circle_mut(&mut img, (gaze.0.round() as i32, gaze.1.round() as i32), 10, GAZE);
    }
    DynamicImage::ImageRgb8(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn overlays_keep_frame_size_and_mark_features() {
        let gray = GrayImage::from_pixel(64, 48, Luma([100]));
        let pupil = PupilEllipse {
            center_x: 32.0,
            center_y: 24.0,
            major_axis: 20.0,
            minor_axis: 14.0,
            angle: 0.2,
            confidence: 1.0,
        };
        let out = pupil_overlay(&gray, &pupil).to_rgb8();
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(*out.get_pixel(32, 24), PUPIL);

        let target = TargetMeasurement {
            frame_index: 0,
            centroid_x: 10.0,
            centroid_y: 10.0,
            found: true,
        };
        let out = marker_overlay(&gray, &[], &target).to_rgb8();
        assert_eq!(*out.get_pixel(10, 10), TARGET);
        assert_eq!(*out.get_pixel(40, 40), Rgb([100, 100, 100]));
    }

    #[test]
    fn gaze_overlay_marks_finite_gaze_only() {
        let gray = GrayImage::from_pixel(64, 48, Luma([90]));
        let out = gaze_overlay(&gray, (20.0, 30.0)).to_rgb8();
        assert_eq!(*out.get_pixel(20, 30), GAZE);
        assert_eq!(*out.get_pixel(26, 30), GAZE);
        assert_eq!(*out.get_pixel(50, 10), Rgb([90, 90, 90]));

        let blank = gaze_overlay(&gray, (f64::NAN, f64::NAN)).to_rgb8();
        assert!(blank.pixels().all(|p| *p == Rgb([90, 90, 90])));
    }
}
