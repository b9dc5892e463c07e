//! File layout of one recording session.

use std::path::{Path, PathBuf};

/// Paths derived from the data directory and the recording stamp `S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    root: PathBuf,
    stamp: String,
}

impl SessionFiles {
    pub fn new(root: impl Into<PathBuf>, stamp: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            stamp: stamp.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    fn named(&self, prefix: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{prefix}_{}{suffix}", self.stamp))
    }

    pub fn eye_frames(&self) -> PathBuf {
        self.named("eye", "")
    }

    pub fn eye_triggers(&self) -> PathBuf {
        self.named("eye", ".txt")
    }

    pub fn scene_frames(&self) -> PathBuf {
        self.named("scene", "")
    }

    pub fn scene_triggers(&self) -> PathBuf {
        self.named("scene", ".txt")
    }

    /// Dedicated board recording; optional.
    pub fn calibration_frames(&self) -> PathBuf {
        self.root.join("calibration")
    }

    pub fn eye_positions(&self) -> PathBuf {
        self.named("eye", "_eyePosition.csv")
    }

    pub fn target_positions(&self) -> PathBuf {
        self.named("scene", "_targetPosition.csv")
    }

    pub fn calibration_artifact(&self) -> PathBuf {
        self.root.join("calibration.bin")
    }

    pub fn gaze_table(&self) -> PathBuf {
        self.named("eye", "_gaze.csv")
    }

    pub fn gaze_model(&self) -> PathBuf {
        self.named("eye", "_gazeModel.json")
    }

    pub fn eye_processed_dir(&self) -> PathBuf {
        self.named("eye", "_processed")
    }

    pub fn eye_pupil_dir(&self) -> PathBuf {
        self.named("eye", "_pupil")
    }

    pub fn scene_processed_dir(&self) -> PathBuf {
        self.named("scene", "_processed")
    }

    pub fn scene_markers_dir(&self) -> PathBuf {
        self.named("scene", "_markers")
    }

    pub fn scene_gaze_dir(&self) -> PathBuf {
        self.named("scene", "_gaze")
    }

    pub fn undistorted_dir(&self) -> PathBuf {
        self.root.join("calibration_undistorted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_recording_stamp() {
        let f = SessionFiles::new("/data", "0511");
        assert_eq!(f.eye_frames(), Path::new("/data/eye_0511"));
        assert_eq!(f.scene_triggers(), Path::new("/data/scene_0511.txt"));
        assert_eq!(f.eye_positions(), Path::new("/data/eye_0511_eyePosition.csv"));
        assert_eq!(f.target_positions(), Path::new("/data/scene_0511_targetPosition.csv"));
        assert_eq!(f.gaze_model(), Path::new("/data/eye_0511_gazeModel.json"));
        assert_eq!(f.calibration_artifact(), Path::new("/data/calibration.bin"));
        assert_eq!(f.scene_markers_dir(), Path::new("/data/scene_0511_markers"));
        assert_eq!(f.scene_gaze_dir(), Path::new("/data/scene_0511_gaze"));
    }
}
