//! Frame sources and QA frame dumps.
//!
//! Recordings are consumed as directories of numbered still images; any format
//! the `image` crate decodes is accepted.

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::error::{FrameWarning, PipelineError};

const FRAME_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Sequential access to the frames of one recording.
pub trait FrameSource {
    /// Number of frames the source expects to deliver.
    fn frame_count(&self) -> usize;

    /// Decode the next frame. `None` at end of stream.
    fn next_frame(&mut self) -> Option<Result<DynamicImage, FrameWarning>>;

    /// Advance past the next frame without decoding it. `false` at end of stream.
    fn skip_frame(&mut self) -> bool;
}

/// Trailing decimal number of a file stem, e.g. `12` for `frame_12.png`.
fn frame_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[stem.len() - digits..].parse().ok()
}

/// A directory of image files, ordered by the frame number at the end of each
/// file stem; files without one sort first, by name.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, PipelineError> {
        if !dir.is_dir() {
            return Err(PipelineError::input_not_found(dir));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort_by_cached_key(|p| (frame_number(p), p.clone()));
        tracing::debug!(dir = %dir.display(), frames = files.len(), "opened image sequence");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSource for ImageSequence {
    fn frame_count(&self) -> usize {
        self.files.len()
    }

    fn next_frame(&mut self) -> Option<Result<DynamicImage, FrameWarning>> {
        let index = self.cursor;
        let path = self.files.get(index)?;
        self.cursor += 1;
        Some(image::open(path).map_err(|e| FrameWarning::Read {
            index,
            reason: e.to_string(),
        }))
    }

    fn skip_frame(&mut self) -> bool {
        if self.cursor < self.files.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }
}

/// Writes numbered PNG frames into a QA directory.
#[derive(Debug)]
pub struct FrameDump {
    dir: PathBuf,
    next_index: usize,
}

impl FrameDump {
    pub fn create(dir: &Path) -> Result<Self, PipelineError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            next_index: 0,
        })
    }

    pub fn write(&mut self, frame: &DynamicImage) -> Result<(), PipelineError> {
        let path = self.dir.join(format!("frame_{:06}.png", self.next_index));
        frame.save(&path)?;
        self.next_index += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn sequence_orders_by_name_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("frame_002.png", 20u8), ("frame_000.png", 0), ("frame_001.png", 10)] {
            GrayImage::from_pixel(4, 3, Luma([value]))
                .save(dir.path().join(name))
                .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.frame_count(), 3);
        assert!(seq.skip_frame());
        let frame = seq.next_frame().unwrap().unwrap().to_luma8();
        assert_eq!(frame.get_pixel(0, 0)[0], 10);
        assert!(seq.next_frame().is_some());
        assert!(seq.next_frame().is_none());
        assert!(!seq.skip_frame());
    }

    #[test]
    fn unpadded_frame_numbers_keep_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12u8 {
            GrayImage::from_pixel(2, 2, Luma([i]))
                .save(dir.path().join(format!("frame_{i}.png")))
                .unwrap();
        }
        let mut seq = ImageSequence::open(dir.path()).unwrap();
        let order: Vec<u8> = std::iter::from_fn(|| seq.next_frame())
            .map(|f| f.unwrap().to_luma8().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(order, (0..12).collect::<Vec<u8>>());
    }

    #[test]
    fn frame_number_reads_trailing_digits() {
        assert_eq!(frame_number(Path::new("a/frame_0010.png")), Some(10));
        assert_eq!(frame_number(Path::new("cam2_7.jpg")), Some(7));
        assert_eq!(frame_number(Path::new("still.png")), None);
    }

    #[test]
    fn undecodable_frame_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_000.png"), b"not a png").unwrap();
        let mut seq = ImageSequence::open(dir.path()).unwrap();
        let warning = seq.next_frame().unwrap().unwrap_err();
        assert_eq!(warning.frame_index(), 0);
    }

    #[test]
    fn missing_directory_is_input_not_found() {
        let err = ImageSequence::open(Path::new("/nonexistent/frames")).unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound { .. }));
    }

    #[test]
    fn dump_numbers_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut dump = FrameDump::create(&dir.path().join("qa")).unwrap();
        let frame = DynamicImage::ImageLuma8(GrayImage::new(2, 2));
        dump.write(&frame).unwrap();
        dump.write(&frame).unwrap();
        assert_eq!(dump.frames_written(), 2);
        assert!(dir.path().join("qa/frame_000001.png").is_file());
    }
}
