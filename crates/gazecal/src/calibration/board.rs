//! Checkerboard-with-markers calibration board.
//!
//! Squares alternate dark and light starting with a dark square at the
//! top-left. Marker `k` is centered in the `k`-th light square in row-major
//! order, i.e. in the squares where `(row + col)` is odd. Board coordinates
//! are in board pixels (`box_width_pix` per square) with `y` pointing down.

use serde::{Deserialize, Serialize};

use crate::marker::dictionary::CODES;
use crate::marker::DetectedMarker;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BoardSpec {
    /// Squares per row.
    pub grid_size_width: usize,
    /// Squares per column.
    pub grid_size_height: usize,
    pub box_width_pix: f64,
    /// Marker side relative to the square side.
    pub marker_ratio: f64,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            grid_size_width: 7,
            grid_size_height: 5,
            box_width_pix: 128.0,
            marker_ratio: 0.8,
        }
    }
}

impl BoardSpec {
    /// Number of light squares, i.e. markers on the board.
    pub fn marker_count(&self) -> usize {
        let total = self.grid_size_width * self.grid_size_height;
        total / 2
    }

    /// Whether every marker has a dictionary code.
    pub fn fits_dictionary(&self) -> bool {
        self.marker_count() <= CODES.len()
    }

    /// Square `(row, col)` holding marker `id`.
    pub fn square_of(&self, id: usize) -> Option<(usize, usize)> {
        if id >= self.marker_count() || self.grid_size_width == 0 {
            return None;
        }
        (0..self.grid_size_height)
            .flat_map(|r| (0..self.grid_size_width).map(move |c| (r, c)))
            .filter(|(r, c)| (r + c) % 2 == 1)
            .nth(id)
    }

    /// Board-plane corners of marker `id`, top-left first, clockwise.
    pub fn object_corners(&self, id: usize) -> Option<[[f64; 2]; 4]> {
        let (r, c) = self.square_of(id)?;
        let s = self.marker_ratio * self.box_width_pix;
        let pad = 0.5 * (self.box_width_pix - s);
        let x0 = c as f64 * self.box_width_pix + pad;
        let y0 = r as f64 * self.box_width_pix + pad;
        Some([[x0, y0], [x0 + s, y0], [x0 + s, y0 + s], [x0, y0 + s]])
    }

    /// Board extent in board pixels `(width, height)`.
    pub fn extent(&self) -> (f64, f64) {
        (
            self.grid_size_width as f64 * self.box_width_pix,
            self.grid_size_height as f64 * self.box_width_pix,
        )
    }
}

/// Board-to-image corner correspondences from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardObservation {
    pub frame_index: usize,
    pub marker_ids: Vec<usize>,
    pub object_points: Vec<[f64; 2]>,
    pub image_points: Vec<[f64; 2]>,
}

impl BoardObservation {
    /// Four correspondences per marker that belongs to `board`. Ids decoded
    /// more than once in the frame are ambiguous and dropped.
    pub fn from_markers(frame_index: usize, markers: &[DetectedMarker], board: &BoardSpec) -> Self {
        let mut obs = Self {
            frame_index,
            marker_ids: Vec::new(),
            object_points: Vec::new(),
            image_points: Vec::new(),
        };
        for m in markers {
            if markers.iter().filter(|o| o.id == m.id).count() > 1 {
                continue;
            }
            let Some(object) = board.object_corners(m.id) else {
                continue;
            };
            obs.marker_ids.push(m.id);
            obs.object_points.extend_from_slice(&object);
            obs.image_points.extend_from_slice(&m.corners);
        }
        obs
    }

    pub fn corner_count(&self) -> usize {
        self.image_points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn default_board_layout() {
        let b = BoardSpec::default();
        assert_eq!(b.marker_count(), 17);
        assert!(b.fits_dictionary());
        assert_eq!(b.square_of(0), Some((0, 1)));
        assert_eq!(b.square_of(2), Some((0, 5)));
        assert_eq!(b.square_of(3), Some((1, 0)));
        assert_eq!(b.square_of(16), Some((4, 5)));
        assert_eq!(b.square_of(17), None);
        let c = b.object_corners(0).unwrap();
        assert_abs_diff_eq!(c[0][0], 128.0 + 12.8, epsilon = 1e-9);
        assert_abs_diff_eq!(c[2][1], 115.2, epsilon = 1e-9);
    }

    #[test]
    fn board_larger_than_dictionary_is_rejected() {
        let b = BoardSpec {
            grid_size_width: 14,
            grid_size_height: 7,
            ..BoardSpec::default()
        };
        assert_eq!(b.marker_count(), 49);
        assert!(!b.fits_dictionary());
    }

    #[test]
    fn observation_skips_unknown_and_duplicate_ids() {
        let b = BoardSpec::default();
        let marker = |id| DetectedMarker {
            id,
            corners: [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            hamming: 0,
        };
        let obs = BoardObservation::from_markers(3, &[marker(1), marker(2), marker(2), marker(17)], &b);
        assert_eq!(obs.marker_ids, vec![1]);
        assert_eq!(obs.corner_count(), 4);
        assert_eq!(obs.object_points[0], b.object_corners(1).unwrap()[0]);
    }
}
