//! Embedded 4×4 marker dictionary.
//!
//! Each marker is a 6×6 cell square: a one-cell black border around a 4×4
//! payload. Payload bits are stored row-major with the most significant bit
//! at the top-left cell; a set bit is a white cell.
//!
//! The codes are the canonical (unrotated) words of the first 20 markers of
//! the OpenCV `DICT_4X4_50` ArUco dictionary, in id order, so boards printed
//! with OpenCV decode to the same ids. Every pair of codes, including each
//! code against its own non-trivial rotations, differs in at least
//! [`MIN_ROTATION_DISTANCE`] bits.

use serde::{Deserialize, Serialize};

/// Payload side length in cells.
pub const PAYLOAD_CELLS: usize = 4;
/// Marker side length in cells, border included.
pub const MARKER_CELLS: usize = PAYLOAD_CELLS + 2;
/// Minimum Hamming distance over all code pairs and rotations.
pub const MIN_ROTATION_DISTANCE: u32 = 4;

/// `DICT_4X4_50` ids 0 to 19.
pub const CODES: [u16; 20] = [
    0xB532, 0x0F9A, 0x332D, 0x9946, 0x549E, 0x79CD, 0x9E2E, 0xC4F2, 0xFEDA, 0xCF56, //
    0xF991, 0x11A7, 0x0EB7, 0x2A0F, 0x24B1, 0x261C, 0x0049, 0x08D0, 0x09AB, 0x173B, //
];

/// Result of matching an observed payload against the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryMatch {
    pub id: usize,
    /// Number of clockwise quarter turns from the canonical code to the observation.
    pub rotation: u8,
    /// Bit errors corrected.
    pub distance: u32,
}

/// Payload of marker `id`.
pub fn code(id: usize) -> Option<u16> {
    CODES.get(id).copied()
}

/// Whether payload cell `(row, col)` of `code` is white.
pub fn bit(code: u16, row: usize, col: usize) -> bool {
    let shift = 15 - (row * PAYLOAD_CELLS + col);
    (code >> shift) & 1 == 1
}

/// Rotate a payload a quarter turn clockwise.
pub fn rotate_cw(code: u16) -> u16 {
    let mut out = 0u16;
    for r in 0..PAYLOAD_CELLS {
        for c in 0..PAYLOAD_CELLS {
            // new[r][c] = old[n-1-c][r]
            out = (out << 1) | bit(code, PAYLOAD_CELLS - 1 - c, r) as u16;
        }
    }
    out
}

/// Pack a row-major grid of white flags into a payload word.
pub fn pack(cells: &[[bool; PAYLOAD_CELLS]; PAYLOAD_CELLS]) -> u16 {
    cells
        .iter()
        .flatten()
        .fold(0u16, |acc, &white| (acc << 1) | white as u16)
}

/// Closest code under any rotation, if within `max_distance` bits.
pub fn match_word(word: u16, max_distance: u32) -> Option<DictionaryMatch> {
    let mut best: Option<DictionaryMatch> = None;
    for (id, &code) in CODES.iter().enumerate() {
        let mut rotated = code;
        for rotation in 0..4u8 {
            let distance = (rotated ^ word).count_ones();
            if distance <= max_distance && best.map_or(true, |b| distance < b.distance) {
                best = Some(DictionaryMatch {
                    id,
                    rotation,
                    distance,
                });
            }
            rotated = rotate_cw(rotated);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_rotations_are_identity() {
        for &code in &CODES {
            let r = rotate_cw(rotate_cw(rotate_cw(rotate_cw(code))));
            assert_eq!(r, code);
        }
    }

    #[test]
    fn rotation_moves_top_left_to_top_right() {
        let top_left = 0x8000u16;
        assert_eq!(rotate_cw(top_left), 0x1000);
    }

    #[test]
    fn dictionary_distance_holds() {
        let mut min = u32::MAX;
        for (i, &a) in CODES.iter().enumerate() {
            for (j, &b) in CODES.iter().enumerate() {
                let mut rb = b;
                for k in 0..4 {
                    if i != j || k != 0 {
                        min = min.min((a ^ rb).count_ones());
                    }
                    rb = rotate_cw(rb);
                }
            }
        }
        assert!(min >= MIN_ROTATION_DISTANCE, "min distance {min}");
    }

    #[test]
    fn rotated_and_corrupted_words_decode() {
        let code = CODES[17];
        let observed = rotate_cw(rotate_cw(code)) ^ 0x0040;
        let m = match_word(observed, 1).unwrap();
        assert_eq!(m.id, 17);
        assert_eq!(m.rotation, 2);
        assert_eq!(m.distance, 1);
        assert!(match_word(0x0000, 1).is_none());
    }

    #[test]
    fn opencv_words_decode_to_their_ids() {
        // Marker bytes as OpenCV stores them: rotation 0 then its other rotations.
        assert_eq!(match_word(0xB532, 0).map(|m| m.id), Some(0));
        assert_eq!(match_word(0x0F9A, 0).map(|m| m.id), Some(1));
        assert_eq!(match_word(0x332D, 0).map(|m| m.id), Some(2));
        assert_eq!(match_word(0x9946, 0).map(|m| m.id), Some(3));
        for word in [0xEB48, 0x4CAD, 0x12D7] {
            let m = match_word(word, 0).unwrap();
            assert_eq!(m.id, 0);
            assert_ne!(m.rotation, 0);
        }
        assert_eq!(match_word(0x4CAD, 0).unwrap().rotation, 2);
    }

    #[test]
    fn pack_matches_bit() {
        let code = CODES[3];
        let mut cells = [[false; PAYLOAD_CELLS]; PAYLOAD_CELLS];
        for (r, row) in cells.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = bit(code, r, c);
            }
        }
        assert_eq!(pack(&cells), code);
        assert_eq!(super::code(3), Some(code));
        assert_eq!(super::code(CODES.len()), None);
    }
}
